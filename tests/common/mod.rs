//! Test doubles shared by the integration tests

#![allow(dead_code)]

pub mod mock_runtime;
pub mod mock_session;

pub use mock_runtime::{MockRuntime, WaitBehavior};
pub use mock_session::{MockConnector, MockSession, Sent};

use std::fs;
use std::path::Path;
use wercker::core::{RunOptions, Step, StepSource};

/// Run options rooted in a scratch directory
pub fn options(dir: &Path) -> RunOptions {
    let project = dir.join("project");
    fs::create_dir_all(&project).unwrap();
    RunOptions {
        run_id: "run1".to_string(),
        application_id: "app-1".to_string(),
        application_name: "demo".to_string(),
        application_owner_name: "acme".to_string(),
        host_root: dir.join("runs"),
        project_path: project,
        git_branch: "main".to_string(),
        ..RunOptions::default()
    }
}

/// An inline script step materialized under the run directory
pub fn script_step(options: &RunOptions, id: &str, code: &str) -> Step {
    Step::new(
        id,
        id,
        StepSource::Script {
            code: code.to_string(),
        },
        options.host_path(&["steps", id]),
    )
}

/// A local step whose directory does not exist
pub fn missing_step(options: &RunOptions, id: &str) -> Step {
    Step::new(
        id,
        id,
        StepSource::Local {
            path: options.project_path.join("no-such-step"),
        },
        options.host_path(&["steps", id]),
    )
}
