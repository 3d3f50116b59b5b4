//! wercker - run container-based build and deploy pipelines locally

pub mod cli;
pub mod core;
pub mod execution;
pub mod runtime;
pub mod service;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use crate::core::{
    Artifact, Environment, EnvPolicy, ExecutionStatus, Pipeline, PipelineError, RunOptions, Step,
    StepState,
};
pub use execution::{Cancellation, EngineSettings, ExecutionEngine, ExecutionEvent, RunOutcome};
pub use runtime::{ContainerRuntime, DockerCli};
pub use service::{ServiceContainer, ServiceEvent, ServiceMonitors};
pub use session::{DockerExecConnector, Session, SessionConnector};
pub use store::LocalStore;
