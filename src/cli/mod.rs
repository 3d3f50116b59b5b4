//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{BuildCommand, DeployCommand, ValidateCommand};
use std::ffi::OsString;

/// Run container-based build and deploy pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "wercker")]
#[command(version = "0.1.0")]
#[command(about = "Run build and deploy pipelines in containers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the build pipeline of a project
    Build(BuildCommand),

    /// Run the deploy pipeline of a project
    Deploy(DeployCommand),

    /// Validate a run configuration
    Validate(ValidateCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
