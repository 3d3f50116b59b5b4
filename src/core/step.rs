//! Step domain model

use crate::core::{error::PipelineError, options::RunOptions, state::StepState};
use crate::core::environment::shell_quote;
use crate::session::{QuietScope, Session};
use crate::store::files_under;
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the entry point inside every step directory
pub const STEP_ENTRY: &str = "run.sh";

/// Where a step's definition comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepSource {
    /// Inline shell code
    Script { code: String },
    /// A directory on the host containing `run.sh`
    Local { path: PathBuf },
}

/// A single step in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    pub name: String,

    pub source: StepSource,

    /// Host directory the step is materialized into
    host_dir: PathBuf,

    /// Location after a successful fetch
    fetched: Option<PathBuf>,

    /// Runtime state
    pub state: StepState,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source: StepSource,
        host_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source,
            host_dir: host_dir.into(),
            fetched: None,
            state: StepState::Pending,
        }
    }

    /// Host directory the step is materialized into
    pub fn host_dir(&self) -> &Path {
        &self.host_dir
    }

    pub fn is_fetched(&self) -> bool {
        self.fetched.is_some()
    }

    /// Materialize the step on the host and return its location
    ///
    /// A step that has already been fetched is not fetched again.
    pub fn fetch(&mut self) -> Result<PathBuf, PipelineError> {
        if let Some(location) = &self.fetched {
            return Ok(location.clone());
        }

        let fetch_error = |reason: String| PipelineError::Fetch {
            id: self.id.clone(),
            reason,
        };

        match &self.source {
            StepSource::Script { code } => {
                fs::create_dir_all(&self.host_dir)
                    .map_err(|e| fetch_error(format!("{}: {}", self.host_dir.display(), e)))?;
                let entry = self.host_dir.join(STEP_ENTRY);
                fs::write(&entry, script_body(code))
                    .map_err(|e| fetch_error(format!("{}: {}", entry.display(), e)))?;
            }
            StepSource::Local { path } => {
                let entry = path.join(STEP_ENTRY);
                if !entry.is_file() {
                    return Err(fetch_error(format!("{} not found", entry.display())));
                }
                copy_tree(path, &self.host_dir)
                    .map_err(|e| fetch_error(format!("{}: {}", path.display(), e)))?;
            }
        }

        debug!("Fetched step {} into {}", self.id, self.host_dir.display());
        self.fetched = Some(self.host_dir.clone());
        self.state = StepState::Fetched;
        Ok(self.host_dir.clone())
    }

    /// Guest commands that install the step and export its variables
    pub fn prepare_commands(&self, options: &RunOptions) -> Vec<String> {
        let step_root = options.guest_path(&["steps", &self.id]);
        let report_dir = options.guest_path(&["report", &self.id]);

        let vars = [
            ("WERCKER_STEP_ROOT", step_root.clone()),
            ("WERCKER_STEP_ID", self.id.clone()),
            ("WERCKER_STEP_NAME", self.name.clone()),
            ("WERCKER_REPORT_NUMBERS_FILE", format!("{}/numbers.ini", report_dir)),
            ("WERCKER_REPORT_MESSAGE_FILE", format!("{}/message.txt", report_dir)),
            ("WERCKER_REPORT_ARTIFACTS_DIR", format!("{}/artifacts", report_dir)),
        ];

        let mut commands = vec![
            format!(r#"mkdir -p "{}""#, options.guest_path(&["steps"])),
            format!(
                r#"cp -r "{}" "{}""#,
                options.mnt_path(&["steps", &self.id]),
                step_root
            ),
            format!(r#"mkdir -p "{}/artifacts""#, report_dir),
        ];
        commands.extend(
            vars.iter()
                .map(|(name, value)| format!("export {}={}", name, shell_quote(value))),
        );
        commands.push(format!(
            r#"cd "{}""#,
            options.guest_path(&["source", &options.source_dir])
        ));
        commands
    }

    /// Run the step inside the guest
    pub async fn execute(
        &mut self,
        session: &dyn Session,
        options: &RunOptions,
    ) -> Result<(), PipelineError> {
        if !self.is_fetched() {
            return Err(PipelineError::NotFetched { id: self.id.clone() });
        }

        let started_at = Utc::now();
        self.state = StepState::Running { started_at };

        let result = self.run_in_guest(session, options).await;

        self.state = match &result {
            Ok(()) => StepState::Completed {
                started_at,
                completed_at: Utc::now(),
            },
            Err(e) => StepState::Failed {
                error: e.to_string(),
                failed_at: Utc::now(),
            },
        };
        result
    }

    async fn run_in_guest(
        &self,
        session: &dyn Session,
        options: &RunOptions,
    ) -> Result<(), PipelineError> {
        {
            let _quiet = QuietScope::new(session);
            for command in self.prepare_commands(options) {
                let outcome = session.send_checked(std::slice::from_ref(&command)).await?;
                if !outcome.success() {
                    return Err(PipelineError::GuestCommand(command));
                }
            }
        }

        info!("Running step: {} ({})", self.name, self.id);
        let entry = options.guest_path(&["steps", &self.id, STEP_ENTRY]);
        let outcome = session
            .send_checked(&[run_command(&entry)])
            .await?;

        if !outcome.success() {
            return Err(PipelineError::StepFailed {
                name: self.name.clone(),
                exit_code: outcome.exit_code,
            });
        }
        Ok(())
    }
}

fn script_body(code: &str) -> String {
    let mut body = String::from("#!/bin/sh\n");
    body.push_str(code);
    if !code.ends_with('\n') {
        body.push('\n');
    }
    body
}

/// Source the entry in a subshell; stdin stays with the session
fn run_command(entry: &str) -> String {
    format!(r#"( set -e; . "{}" ) < /dev/null"#, entry)
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for relative in files_under(from)? {
        let target = to.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from.join(&relative), &target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_script_writes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut step = Step::new(
            "s1",
            "echo",
            StepSource::Script {
                code: "echo hello".to_string(),
            },
            dir.path().join("steps/s1"),
        );

        let location = step.fetch().unwrap();
        assert!(step.is_fetched());
        assert_eq!(step.state, StepState::Fetched);
        assert_eq!(
            fs::read_to_string(location.join(STEP_ENTRY)).unwrap(),
            "#!/bin/sh\necho hello\n"
        );
    }

    #[test]
    fn test_fetch_local_requires_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut step = Step::new(
            "s1",
            "local",
            StepSource::Local {
                path: dir.path().join("missing"),
            },
            dir.path().join("steps/s1"),
        );

        let result = step.fetch();
        assert!(matches!(result, Err(PipelineError::Fetch { .. })));
        assert!(!step.is_fetched());
    }

    #[test]
    fn test_fetch_local_copies_directory() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("my-step");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join(STEP_ENTRY), "echo local\n").unwrap();
        fs::write(src.join("lib/helper.sh"), "true\n").unwrap();

        let mut step = Step::new(
            "s1",
            "local",
            StepSource::Local { path: src },
            dir.path().join("steps/s1"),
        );

        let location = step.fetch().unwrap();
        assert!(location.join("lib/helper.sh").is_file());
        assert_eq!(
            fs::read_to_string(location.join(STEP_ENTRY)).unwrap(),
            "echo local\n"
        );
    }

    #[test]
    fn test_run_command_detaches_stdin() {
        assert_eq!(
            run_command("/pipeline/steps/s1/run.sh"),
            r#"( set -e; . "/pipeline/steps/s1/run.sh" ) < /dev/null"#
        );
    }

    #[test]
    fn test_prepare_commands_export_step_variables() {
        let options = RunOptions {
            source_dir: "app".to_string(),
            ..RunOptions::default()
        };
        let step = Step::new(
            "s1",
            "build it",
            StepSource::Script {
                code: String::new(),
            },
            "/tmp/unused",
        );

        let commands = step.prepare_commands(&options);
        assert_eq!(commands[1], r#"cp -r "/mnt/steps/s1" "/pipeline/steps/s1""#);
        assert!(commands.contains(&"export WERCKER_STEP_NAME='build it'".to_string()));
        assert_eq!(commands.last().unwrap(), r#"cd "/pipeline/source/app""#);
    }
}
