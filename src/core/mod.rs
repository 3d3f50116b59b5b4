//! Core domain models for a pipeline run
//!
//! This module defines the environment, steps and pipelines, plus the
//! configuration they are built from.

pub mod artifact;
pub mod build;
pub mod config;
pub mod deploy;
pub mod environment;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod state;
pub mod step;

pub use artifact::Artifact;
pub use environment::Environment;
pub use error::PipelineError;
pub use options::{EnvPolicy, RunOptions};
pub use pipeline::*;
pub use state::*;
pub use step::*;
