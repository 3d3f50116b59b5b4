//! Pipeline error taxonomy

use crate::runtime::RuntimeError;
use crate::service::ServiceError;
use crate::session::SessionError;
use crate::store::StoreError;
use thiserror::Error;

/// Error types for pipeline stages
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The command channel could not deliver or observe a command
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A guest command ran and exited non-zero
    #[error("Guest command failed: {0}")]
    GuestCommand(String),

    #[error("Failed to export environment, exit code: {0}")]
    Export(i32),

    #[error("Failed to fetch step {id}: {reason}")]
    Fetch { id: String, reason: String },

    #[error("Step {id} has not been fetched")]
    NotFetched { id: String },

    #[error("Step {name} failed with exit code: {exit_code}")]
    StepFailed { name: String, exit_code: i32 },

    #[error("Artifact collection failed: {0}")]
    Artifact(String),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Service {service} failed: {reason}")]
    ServiceFailed { service: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether the error came from cancelling the run
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled | PipelineError::Session(SessionError::Cancelled)
        )
    }
}
