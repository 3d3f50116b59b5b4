//! Remote command channel into the guest

pub mod docker_exec;

use async_trait::async_trait;
use thiserror::Error;

pub use docker_exec::{DockerExecConnector, DockerExecSession};

use crate::execution::Cancellation;
use crate::runtime::ContainerHandle;

/// Error types for session operations
///
/// These are transport failures: the command could not be delivered or its
/// outcome could not be observed. A command that ran and exited non-zero is
/// not an error at this layer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to open session: {0}")]
    Open(String),

    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session closed before the command finished")]
    Closed,

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Malformed exit status: {0}")]
    Protocol(String),
}

/// Exit status and captured output of a command batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Command channel bound to one running guest
///
/// Calls are made one at a time by the primary flow. Implementations are
/// not expected to support concurrent senders.
#[async_trait]
pub trait Session: Send + Sync {
    /// Run a batch of commands and report the exit status of the last one
    async fn send_checked(&self, commands: &[String]) -> Result<CommandOutcome, SessionError>;

    /// Stop logging subsequent sends until [`Session::show_logs`]
    fn hide_logs(&self);

    /// Resume logging sends
    fn show_logs(&self);

    fn logs_visible(&self) -> bool;
}

/// Opens sessions into a guest container
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(
        &self,
        guest: &ContainerHandle,
        cancel: Cancellation,
    ) -> Result<Box<dyn Session>, SessionError>;
}

/// Hides session logs for as long as it is alive
///
/// Visibility is restored when the guard drops, whichever way the enclosing
/// scope exits.
pub struct QuietScope<'a, S: Session + ?Sized> {
    session: &'a S,
}

impl<'a, S: Session + ?Sized> QuietScope<'a, S> {
    pub fn new(session: &'a S) -> Self {
        session.hide_logs();
        Self { session }
    }
}

impl<S: Session + ?Sized> Drop for QuietScope<'_, S> {
    fn drop(&mut self) {
        self.session.show_logs();
    }
}
