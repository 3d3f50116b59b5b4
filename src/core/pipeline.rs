//! Pipeline domain model
//!
//! [`BasePipeline`] carries the orchestration shared by every pipeline:
//! environment composition, step fetching, guest setup and environment
//! export. What differs between a build and a deploy lives behind the
//! [`PipelineKind`] capability trait, and [`Pipeline`] composes the two.

use crate::core::{
    artifact::Artifact,
    build::Build,
    deploy::Deploy,
    environment::Environment,
    error::PipelineError,
    options::RunOptions,
    state::{PipelineState, StepState},
    step::Step,
};
use crate::runtime::{ContainerHandle, ContainerRuntime};
use crate::session::{QuietScope, Session};
use async_trait::async_trait;
use tracing::{debug, info};

/// Guest directory shared between runs for caches
pub const CACHE_DIR: &str = "/cache";

/// Terminal type exported to the guest
pub const TERM: &str = "xterm-256color";

/// Behavior specific to one kind of pipeline
#[async_trait]
pub trait PipelineKind: Send + Sync {
    /// Short name, `build` or `deploy`
    fn kind(&self) -> &'static str;

    /// Compose the full environment into `base.env_mut()`
    fn init_env(&self, base: &mut BasePipeline);

    /// Copy the pipeline's result out of the guest
    async fn collect_artifact(
        &self,
        base: &BasePipeline,
        session: &dyn Session,
        runtime: &dyn ContainerRuntime,
        guest: &ContainerHandle,
    ) -> Result<Artifact, PipelineError>;

    fn docker_repo(&self, base: &BasePipeline) -> String;

    fn docker_tag(&self, base: &BasePipeline) -> String;

    fn docker_message(&self, base: &BasePipeline) -> String;
}

/// State and behavior shared by builds and deploys
#[derive(Debug, Clone)]
pub struct BasePipeline {
    options: RunOptions,
    env: Environment,
    steps: Vec<Step>,
}

impl BasePipeline {
    pub fn new(options: RunOptions, steps: Vec<Step>) -> Self {
        Self {
            options,
            env: Environment::new(),
            steps,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Pipeline identity variables, shared by builds and deploys
    pub fn common_env(&self) -> Vec<(String, String)> {
        let o = &self.options;
        [
            ("WERCKER", "true".to_string()),
            ("WERCKER_ROOT", o.guest_path(&["source"])),
            ("WERCKER_SOURCE_DIR", o.guest_path(&["source", &o.source_dir])),
            ("WERCKER_CACHE_DIR", CACHE_DIR.to_string()),
            ("WERCKER_OUTPUT_DIR", o.guest_path(&["output"])),
            ("WERCKER_PIPELINE_DIR", o.guest_path(&[])),
            ("WERCKER_REPORT_DIR", o.guest_path(&["report"])),
            ("WERCKER_APPLICATION_ID", o.application_id.clone()),
            ("WERCKER_APPLICATION_NAME", o.application_name.clone()),
            ("WERCKER_APPLICATION_OWNER_NAME", o.application_owner_name.clone()),
            (
                "WERCKER_APPLICATION_URL",
                format!("{}#application/{}", o.base_url, o.application_id),
            ),
            ("TERM", TERM.to_string()),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }

    /// Host variables mirrored verbatim
    pub fn mirror_env(&self) -> Vec<(String, String)> {
        self.options.mirror_variables()
    }

    /// Allowlisted host variables
    pub fn passthru_env(&self) -> Vec<(String, String)> {
        self.options.passthru_variables()
    }

    /// Fetch every step in declared order, stopping at the first failure
    pub fn fetch_steps(&mut self) -> Result<(), PipelineError> {
        for step in &mut self.steps {
            info!("Fetching Step: {} {}", step.name, step.id);
            step.fetch()?;
        }
        Ok(())
    }

    /// Guest commands run by [`BasePipeline::setup_guest`], in order
    pub fn setup_commands(&self) -> Vec<String> {
        let o = &self.options;
        vec![
            // Make sure our guest path exists
            format!(r#"mkdir "{}""#, o.guest_path(&[])),
            // Make sure the output path exists
            format!(r#"mkdir "{}""#, o.guest_path(&["output"])),
            // Make sure the cache dir exists
            format!(r#"mkdir "{}""#, CACHE_DIR),
            // Copy the source from the mounted directory to the pipeline dir
            format!(
                r#"cp -r "{}" "{}""#,
                o.mnt_path(&["source"]),
                o.guest_path(&["source"])
            ),
        ]
    }

    /// Prepare the guest filesystem for the pipeline
    ///
    /// Commands run one at a time with session logs hidden; visibility is
    /// restored however this returns.
    pub async fn setup_guest(&self, session: &dyn Session) -> Result<(), PipelineError> {
        let _quiet = QuietScope::new(session);

        for command in self.setup_commands() {
            let outcome = session.send_checked(std::slice::from_ref(&command)).await?;
            if !outcome.success() {
                return Err(PipelineError::GuestCommand(command));
            }
        }

        Ok(())
    }

    /// Push the composed environment into the guest as one batch
    pub async fn export_environment(&self, session: &dyn Session) -> Result<(), PipelineError> {
        let outcome = session.send_checked(&self.env.export()).await?;
        if !outcome.success() {
            return Err(PipelineError::Export(outcome.exit_code));
        }
        Ok(())
    }

    /// Dump the composed environment to the logs
    pub fn log_environment(&self) {
        debug!("Base Pipeline Environment:");
        for (name, value) in self.env.ordered() {
            debug!("  {} {}", name, value);
        }
    }

    /// Run the step at `index` inside the guest
    pub async fn run_step(
        &mut self,
        index: usize,
        session: &dyn Session,
    ) -> Result<(), PipelineError> {
        let options = &self.options;
        match self.steps.get_mut(index) {
            Some(step) => step.execute(session, options).await,
            None => Err(PipelineError::NotFetched {
                id: format!("#{}", index),
            }),
        }
    }

    /// Mark every step from `from` onwards as skipped
    pub fn skip_remaining(&mut self, from: usize, reason: &str) {
        for step in self.steps.iter_mut().skip(from) {
            step.state = StepState::Skipped {
                reason: reason.to_string(),
            };
        }
    }

    /// Copy `guest_path` out of the guest and describe it as an artifact
    pub async fn collect_from(
        &self,
        kind: &str,
        guest_path: String,
        session: &dyn Session,
        runtime: &dyn ContainerRuntime,
        guest: &ContainerHandle,
    ) -> Result<Artifact, PipelineError> {
        {
            let _quiet = QuietScope::new(session);
            let check = format!(r#"test -d "{}""#, guest_path);
            let outcome = session.send_checked(std::slice::from_ref(&check)).await?;
            if !outcome.success() {
                return Err(PipelineError::Artifact(format!(
                    "{} does not exist in the guest",
                    guest_path
                )));
            }
        }

        let host_path = self.options.host_path(&["artifacts", kind]);
        if let Some(parent) = host_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Artifact(format!("{}: {}", parent.display(), e)))?;
        }

        runtime
            .copy_from_container(guest, &guest_path, &host_path)
            .await?;

        info!("Collected {} artifact from {}", kind, guest_path);
        Ok(Artifact {
            container_id: guest.id.clone(),
            guest_path,
            host_path,
            application_id: self.options.application_id.clone(),
            run_id: self.options.run_id.clone(),
            kind: kind.to_string(),
        })
    }
}

/// A build or deploy run: the shared base plus its kind
pub struct Pipeline {
    base: BasePipeline,
    kind: Box<dyn PipelineKind>,

    /// Execution state
    pub state: PipelineState,
}

impl Pipeline {
    pub fn new(options: RunOptions, steps: Vec<Step>, kind: Box<dyn PipelineKind>) -> Self {
        Self {
            base: BasePipeline::new(options, steps),
            kind,
            state: PipelineState::new(),
        }
    }

    pub fn build(options: RunOptions, steps: Vec<Step>) -> Self {
        Self::new(options, steps, Box::new(Build))
    }

    pub fn deploy(options: RunOptions, steps: Vec<Step>) -> Self {
        Self::new(options, steps, Box::new(Deploy))
    }

    pub fn base(&self) -> &BasePipeline {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BasePipeline {
        &mut self.base
    }

    pub fn kind(&self) -> &'static str {
        self.kind.kind()
    }

    pub fn options(&self) -> &RunOptions {
        self.base.options()
    }

    pub fn env(&self) -> &Environment {
        self.base.env()
    }

    pub fn steps(&self) -> &[Step] {
        self.base.steps()
    }

    /// Compose the environment for this kind of pipeline
    pub fn init_env(&mut self) {
        self.kind.init_env(&mut self.base);
    }

    pub fn fetch_steps(&mut self) -> Result<(), PipelineError> {
        self.base.fetch_steps()
    }

    pub async fn setup_guest(&self, session: &dyn Session) -> Result<(), PipelineError> {
        self.base.setup_guest(session).await
    }

    pub async fn export_environment(&self, session: &dyn Session) -> Result<(), PipelineError> {
        self.base.export_environment(session).await
    }

    pub fn log_environment(&self) {
        self.base.log_environment();
    }

    pub async fn collect_artifact(
        &self,
        session: &dyn Session,
        runtime: &dyn ContainerRuntime,
        guest: &ContainerHandle,
    ) -> Result<Artifact, PipelineError> {
        self.kind
            .collect_artifact(&self.base, session, runtime, guest)
            .await
    }

    pub fn docker_repo(&self) -> String {
        self.kind.docker_repo(&self.base)
    }

    pub fn docker_tag(&self) -> String {
        self.kind.docker_tag(&self.base)
    }

    pub fn docker_message(&self) -> String {
        self.kind.docker_message(&self.base)
    }
}
