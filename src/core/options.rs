//! Run options shared by every stage of a pipeline run

use crate::core::environment::Environment;
use std::collections::HashMap;
use std::path::PathBuf;

/// Host variables forwarded verbatim when present
pub const MIRRORED_ENV: &[&str] = &[
    "WERCKER_STARTED_BY",
    "WERCKER_MAIN_PIPELINE_STARTED",
    "WERCKER_GIT_SSH_KEY",
    "DEPLOY_ID",
    "BUILD_ID",
];

/// Prefix marking host variables that pass through with the prefix stripped
pub const PASSTHRU_PREFIX: &str = "X_";

/// Policy deciding which host variables reach the guest
#[derive(Debug, Clone, Default)]
pub struct EnvPolicy {
    host: HashMap<String, String>,
}

impl EnvPolicy {
    /// Capture the current process environment
    pub fn from_host() -> Self {
        Self {
            host: std::env::vars().collect(),
        }
    }

    /// Use an explicit host environment
    pub fn with_host_env<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            host: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// The captured host environment, sorted by name
    pub fn host_environment(&self) -> Environment {
        let mut names: Vec<_> = self.host.keys().collect();
        names.sort();
        let mut env = Environment::new();
        for name in names {
            env.add(name.clone(), self.host[name].clone());
        }
        env
    }

    /// Mirrored variables present on the host, in mirror-list order
    pub fn mirror_variables(&self) -> Vec<(String, String)> {
        MIRRORED_ENV
            .iter()
            .filter_map(|name| {
                self.host
                    .get(*name)
                    .map(|value| (name.to_string(), value.clone()))
            })
            .collect()
    }

    /// `X_`-prefixed host variables with the prefix stripped, sorted by name
    pub fn passthru_variables(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .host
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(PASSTHRU_PREFIX)
                    .filter(|stripped| !stripped.is_empty())
                    .map(|stripped| (stripped.to_string(), value.clone()))
            })
            .collect();
        vars.sort();
        vars
    }
}

/// Options for a single pipeline run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Unique id of this run, used in container names and artifact keys
    pub run_id: String,

    pub application_id: String,
    pub application_name: String,
    pub application_owner_name: String,

    /// Base URL of the web front end
    pub base_url: String,

    /// Name of the source directory inside the copied source tree
    pub source_dir: String,

    /// Root of the pipeline inside the guest
    pub guest_root: String,

    /// Where host directories are mounted inside the guest
    pub mnt_root: String,

    /// Local working directory, one subdirectory per run
    pub host_root: PathBuf,

    /// Host directory holding the project source
    pub project_path: PathBuf,

    pub git_domain: String,
    pub git_owner: String,
    pub git_repository: String,
    pub git_branch: String,
    pub git_commit: String,

    /// Deploy target, only meaningful for deploys
    pub deploy_target: String,

    pub env: EnvPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            application_id: String::new(),
            application_name: String::new(),
            application_owner_name: String::new(),
            base_url: "https://app.wercker.com/".to_string(),
            source_dir: String::new(),
            guest_root: "/pipeline".to_string(),
            mnt_root: "/mnt".to_string(),
            host_root: default_working_dir(),
            project_path: PathBuf::from("."),
            git_domain: String::new(),
            git_owner: String::new(),
            git_repository: String::new(),
            git_branch: String::new(),
            git_commit: String::new(),
            deploy_target: String::new(),
            env: EnvPolicy::default(),
        }
    }
}

impl RunOptions {
    /// Path inside the guest under the pipeline root
    pub fn guest_path(&self, segments: &[&str]) -> String {
        join_posix(&self.guest_root, segments)
    }

    /// Path inside the guest under the mount root
    pub fn mnt_path(&self, segments: &[&str]) -> String {
        join_posix(&self.mnt_root, segments)
    }

    /// Local path for this run
    pub fn host_path(&self, segments: &[&str]) -> PathBuf {
        let mut path = self.host_root.join(&self.run_id);
        for segment in segments {
            path.push(segment);
        }
        path
    }

    /// Mirror layer from the environment policy
    pub fn mirror_variables(&self) -> Vec<(String, String)> {
        self.env.mirror_variables()
    }

    /// Passthru layer from the environment policy
    pub fn passthru_variables(&self) -> Vec<(String, String)> {
        self.env.passthru_variables()
    }
}

/// Default working directory for run state
pub fn default_working_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wercker")
        .join("runs")
}

fn join_posix(root: &str, segments: &[&str]) -> String {
    let mut path = root.trim_end_matches('/').to_string();
    for segment in segments.iter().filter(|s| !s.is_empty()) {
        path.push('/');
        path.push_str(segment.trim_matches('/'));
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}
