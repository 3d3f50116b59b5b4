//! Run configuration from YAML

use crate::core::{
    environment::Environment,
    options::RunOptions,
    step::{Step, StepSource},
};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Top-level run configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Image the guest is created from
    #[serde(rename = "box")]
    pub box_image: String,

    /// Service containers started next to the guest
    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub build: Option<PipelineSection>,

    #[serde(default)]
    pub deploy: Option<PipelineSection>,

    /// Fail the run when a service container exits non-zero
    #[serde(default)]
    pub fail_on_service_error: bool,

    /// Timeout for each guest command batch (seconds)
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// Subdirectory of the source tree steps run in
    #[serde(default)]
    pub source_dir: Option<String>,
}

/// A service as declared in YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceConfig {
    /// Just an image name
    Image(String),
    /// Image name plus options
    Detailed {
        name: String,
        #[serde(default)]
        network_disabled: bool,
    },
}

impl ServiceConfig {
    pub fn name(&self) -> &str {
        match self {
            ServiceConfig::Image(name) => name,
            ServiceConfig::Detailed { name, .. } => name,
        }
    }

    pub fn network_disabled(&self) -> bool {
        match self {
            ServiceConfig::Image(_) => false,
            ServiceConfig::Detailed {
                network_disabled, ..
            } => *network_disabled,
        }
    }
}

/// Steps of a build or deploy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepConfig {
    /// Inline shell code
    Script {
        name: String,
        #[serde(default)]
        id: Option<String>,
        code: String,
    },
    /// A step directory on the host
    Local {
        path: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

impl StepConfig {
    /// Explicit id, if one was given
    pub fn explicit_id(&self) -> Option<&str> {
        match self {
            StepConfig::Script { id, .. } | StepConfig::Local { id, .. } => id.as_deref(),
        }
    }

    /// Display name
    pub fn name(&self) -> String {
        match self {
            StepConfig::Script { name, .. } => name.clone(),
            StepConfig::Local { name: Some(name), .. } => name.clone(),
            StepConfig::Local { path, .. } => Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone()),
        }
    }

    /// Explicit id, or one derived from the position and name
    pub fn id(&self, index: usize) -> String {
        match self.explicit_id() {
            Some(id) => id.to_string(),
            None => format!("{}-{}", index + 1, slug(&self.name())),
        }
    }
}

fn slug_separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"))
}

fn valid_step_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid regex"))
}

fn slug(name: &str) -> String {
    slug_separators()
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Which pipeline of the config to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineChoice {
    Build,
    Deploy,
}

impl PipelineChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineChoice::Build => "build",
            PipelineChoice::Deploy => "deploy",
        }
    }
}

impl RunConfig {
    /// Load run configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse run configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RunConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the run configuration
    pub fn validate(&self) -> Result<()> {
        if self.box_image.trim().is_empty() {
            anyhow::bail!("No box defined");
        }

        for service in &self.services {
            if service.name().trim().is_empty() {
                anyhow::bail!("Service with an empty image name");
            }
        }

        for (choice, section) in [
            (PipelineChoice::Build, &self.build),
            (PipelineChoice::Deploy, &self.deploy),
        ] {
            let Some(section) = section else { continue };
            let mut seen_ids = HashSet::new();
            for (index, step) in section.steps.iter().enumerate() {
                let id = step.id(index);
                // Ids become directory names on the host and in the guest
                if !valid_step_id().is_match(&id) || id == "." || id == ".." {
                    anyhow::bail!("Invalid step ID in {}: {:?}", choice.as_str(), id);
                }
                if !seen_ids.insert(id.clone()) {
                    anyhow::bail!("Duplicate step ID in {}: {}", choice.as_str(), id);
                }
            }
        }

        Ok(())
    }

    /// Expand `$VAR` references in image names
    pub fn interpolate(&mut self, env: &Environment) {
        self.box_image = env.interpolate(&self.box_image);
        for service in &mut self.services {
            match service {
                ServiceConfig::Image(name) | ServiceConfig::Detailed { name, .. } => {
                    *name = env.interpolate(name);
                }
            }
        }
    }

    pub fn section(&self, choice: PipelineChoice) -> Option<&PipelineSection> {
        match choice {
            PipelineChoice::Build => self.build.as_ref(),
            PipelineChoice::Deploy => self.deploy.as_ref(),
        }
    }

    /// Build the step list of a pipeline
    ///
    /// Local step paths are resolved against the project directory.
    pub fn to_steps(&self, choice: PipelineChoice, options: &RunOptions) -> Result<Vec<Step>> {
        let section = self
            .section(choice)
            .with_context(|| format!("No {} pipeline defined", choice.as_str()))?;

        Ok(section
            .steps
            .iter()
            .enumerate()
            .map(|(index, config)| {
                let id = config.id(index);
                let source = match config {
                    StepConfig::Script { code, .. } => StepSource::Script { code: code.clone() },
                    StepConfig::Local { path, .. } => StepSource::Local {
                        path: resolve(&options.project_path, path),
                    },
                };
                let host_dir = options.host_path(&["steps", &id]);
                Step::new(id, config.name(), source, host_dir)
            })
            .collect())
    }
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
box: golang:1.22
services:
  - redis
  - name: postgres:9.4
    network_disabled: true
build:
  steps:
    - script:
        name: Run Tests
        code: go test ./...
    - local:
        id: lint
        path: steps/lint
deploy:
  steps:
    - script:
        name: ship
        code: ./ship.sh
"#;

    #[test]
    fn test_parse_services() {
        let config = RunConfig::from_yaml(YAML).unwrap();
        assert_eq!(config.box_image, "golang:1.22");
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].name(), "redis");
        assert!(!config.services[0].network_disabled());
        assert_eq!(config.services[1].name(), "postgres:9.4");
        assert!(config.services[1].network_disabled());
        assert!(!config.fail_on_service_error);
    }

    #[test]
    fn test_to_steps_keeps_declared_order() {
        let config = RunConfig::from_yaml(YAML).unwrap();
        let options = RunOptions {
            run_id: "r1".to_string(),
            project_path: PathBuf::from("/work/project"),
            host_root: PathBuf::from("/tmp/runs"),
            ..RunOptions::default()
        };

        let steps = config.to_steps(PipelineChoice::Build, &options).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].id, "1-run-tests");
        assert_eq!(steps[0].name, "Run Tests");
        assert_eq!(steps[1].id, "lint");
        assert_eq!(steps[1].name, "lint");
        assert_eq!(
            steps[1].source,
            StepSource::Local {
                path: PathBuf::from("/work/project/steps/lint")
            }
        );
        assert_eq!(steps[1].host_dir(), Path::new("/tmp/runs/r1/steps/lint"));
    }

    #[test]
    fn test_missing_section_is_error() {
        let yaml = "box: alpine\nbuild:\n  steps: []\n";
        let config = RunConfig::from_yaml(yaml).unwrap();
        let result = config.to_steps(PipelineChoice::Deploy, &RunOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_box_is_rejected() {
        let result = RunConfig::from_yaml("box: \"\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_step_ids_are_rejected() {
        let yaml = r#"
box: alpine
build:
  steps:
    - script:
        id: same
        name: a
        code: "true"
    - script:
        id: same
        name: b
        code: "true"
"#;
        let err = RunConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate step ID"));
    }

    #[test]
    fn test_step_ids_must_be_plain_names() {
        for id in ["../escape", "a/b", "..", ".", "with space"] {
            let yaml = format!(
                "box: alpine\nbuild:\n  steps:\n    - script:\n        id: \"{}\"\n        name: x\n        code: \"true\"\n",
                id
            );
            let err = RunConfig::from_yaml(&yaml).unwrap_err();
            assert!(err.to_string().contains("Invalid step ID"), "{}: {}", id, err);
        }

        let yaml = "box: alpine\nbuild:\n  steps:\n    - local:\n        id: lint_v1.2-x\n        path: steps/lint\n";
        assert!(RunConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_deploy_steps_parse_from_tagged_maps() {
        let config = RunConfig::from_yaml(YAML).unwrap();
        let deploy = config.section(PipelineChoice::Deploy).unwrap();
        assert_eq!(
            deploy.steps,
            vec![StepConfig::Script {
                name: "ship".to_string(),
                id: None,
                code: "./ship.sh".to_string(),
            }]
        );
        let build = config.section(PipelineChoice::Build).unwrap();
        assert!(matches!(&build.steps[1], StepConfig::Local { id: Some(id), .. } if id == "lint"));
    }

    #[test]
    fn test_derived_ids_are_slugs() {
        let step = StepConfig::Script {
            name: "Build & Push!".to_string(),
            id: None,
            code: String::new(),
        };
        assert_eq!(step.id(2), "3-build-push");
    }

    #[test]
    fn test_interpolate_image_names() {
        let mut config = RunConfig::from_yaml("box: golang:$GO_VERSION\nservices:\n  - ${DB}\n").unwrap();
        let mut env = Environment::new();
        env.add("GO_VERSION", "1.22");
        env.add("DB", "mongo");
        config.interpolate(&env);

        assert_eq!(config.box_image, "golang:1.22");
        assert_eq!(config.services[0].name(), "mongo");
    }
}
