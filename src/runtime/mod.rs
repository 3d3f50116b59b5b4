//! Container runtime collaborator

pub mod docker_cli;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use docker_cli::DockerCli;

/// Error types for runtime operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Runtime command failed: {0}")]
    Command(String),

    #[error("Failed to execute runtime: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Unexpected runtime output: {0}")]
    Parse(String),
}

/// What to create a container from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network_disabled: bool,

    /// Host path to container path bind mounts
    pub binds: Vec<(PathBuf, String)>,

    /// Command override, empty keeps the image default
    pub cmd: Vec<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            network_disabled: false,
            binds: Vec::new(),
            cmd: Vec::new(),
        }
    }

    pub fn with_network_disabled(mut self, disabled: bool) -> Self {
        self.network_disabled = disabled;
        self
    }

    pub fn with_bind(mut self, host: impl Into<PathBuf>, guest: impl Into<String>) -> Self {
        self.binds.push((host.into(), guest.into()));
        self
    }

    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }
}

/// A container known to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime-assigned id
    pub id: String,
    pub name: String,
}

/// Combined logs of an exited container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Primitives for managing containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    async fn start_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Block until the container exits and return its status
    async fn wait_container(&self, handle: &ContainerHandle) -> Result<i64, RuntimeError>;

    async fn fetch_logs(&self, handle: &ContainerHandle) -> Result<ContainerLogs, RuntimeError>;

    /// Force-remove the container
    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Copy a path out of the container onto the host
    async fn copy_from_container(
        &self,
        handle: &ContainerHandle,
        guest_path: &str,
        host_path: &Path,
    ) -> Result<(), RuntimeError>;
}
