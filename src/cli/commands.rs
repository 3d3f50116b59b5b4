//! CLI command definitions

use crate::core::{
    config::{PipelineChoice, RunConfig},
    EnvPolicy, RunOptions,
};
use clap::Args;
use std::path::PathBuf;

/// Options shared by build and deploy
#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Path to the run configuration, relative to the project
    #[arg(short, long, default_value = "wercker.yml")]
    pub file: String,

    /// Project source directory
    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,

    /// Where per-run state is kept
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Explicit run id (a random one is generated otherwise)
    #[arg(long)]
    pub run_id: Option<String>,

    #[arg(long, default_value = "")]
    pub application_id: String,

    #[arg(long, default_value = "")]
    pub application_name: String,

    #[arg(long, default_value = "")]
    pub application_owner_name: String,

    #[arg(long, default_value = "https://app.wercker.com/")]
    pub base_url: String,

    #[arg(long, default_value = "")]
    pub git_domain: String,

    #[arg(long, default_value = "")]
    pub git_owner: String,

    #[arg(long, default_value = "")]
    pub git_repository: String,

    #[arg(long, default_value = "")]
    pub git_branch: String,

    #[arg(long, default_value = "")]
    pub git_commit: String,

    /// Leave the guest and service containers in place afterwards
    #[arg(long)]
    pub keep_containers: bool,

    /// Don't copy artifacts into the local store
    #[arg(long)]
    pub no_store: bool,

    /// Path to the docker binary
    #[arg(long, default_value = "docker")]
    pub docker: String,
}

impl RunArgs {
    /// Location of the run configuration
    pub fn config_path(&self) -> PathBuf {
        self.project_dir.join(&self.file)
    }

    /// Build run options for one pipeline
    pub fn to_options(&self, config: &RunConfig, env: EnvPolicy) -> RunOptions {
        let defaults = RunOptions::default();
        RunOptions {
            run_id: self.run_id.clone().unwrap_or(defaults.run_id),
            application_id: self.application_id.clone(),
            application_name: self.application_name.clone(),
            application_owner_name: self.application_owner_name.clone(),
            base_url: self.base_url.clone(),
            source_dir: config.source_dir.clone().unwrap_or_default(),
            host_root: self.working_dir.clone().unwrap_or(defaults.host_root),
            project_path: self.project_dir.clone(),
            git_domain: self.git_domain.clone(),
            git_owner: self.git_owner.clone(),
            git_repository: self.git_repository.clone(),
            git_branch: self.git_branch.clone(),
            git_commit: self.git_commit.clone(),
            env,
            ..defaults
        }
    }

    /// Root of the local artifact store
    pub fn store_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(crate::core::options::default_working_dir)
            .join("store")
    }
}

/// Run a build
#[derive(Debug, Args, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Run a deploy
#[derive(Debug, Args, Clone)]
pub struct DeployCommand {
    #[command(flatten)]
    pub run: RunArgs,

    /// Name of the deploy target
    #[arg(long, default_value = "")]
    pub target: String,
}

impl BuildCommand {
    pub fn choice(&self) -> PipelineChoice {
        PipelineChoice::Build
    }
}

impl DeployCommand {
    pub fn choice(&self) -> PipelineChoice {
        PipelineChoice::Deploy
    }
}

/// Validate a run configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the run configuration
    #[arg(short, long, default_value = "wercker.yml")]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
