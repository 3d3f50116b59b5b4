//! Build pipelines

use crate::core::{
    artifact::Artifact,
    environment::layer,
    error::PipelineError,
    pipeline::{BasePipeline, PipelineKind},
};
use crate::runtime::{ContainerHandle, ContainerRuntime};
use crate::session::Session;
use async_trait::async_trait;

/// Git metadata shared by builds and deploys
/// Image tag for a run: the git branch, or `latest` without one
pub(crate) fn branch_tag(base: &BasePipeline) -> String {
    let branch = &base.options().git_branch;
    if branch.is_empty() {
        "latest".to_string()
    } else {
        branch.clone()
    }
}

pub(crate) fn git_env(base: &BasePipeline) -> Vec<(String, String)> {
    let o = base.options();
    layer(&[
        ("WERCKER_GIT_DOMAIN", o.git_domain.as_str()),
        ("WERCKER_GIT_OWNER", o.git_owner.as_str()),
        ("WERCKER_GIT_REPOSITORY", o.git_repository.as_str()),
        ("WERCKER_GIT_BRANCH", o.git_branch.as_str()),
        ("WERCKER_GIT_COMMIT", o.git_commit.as_str()),
    ])
}

/// Builds compile and test the source, producing the output directory
#[derive(Debug, Clone, Copy, Default)]
pub struct Build;

#[async_trait]
impl PipelineKind for Build {
    fn kind(&self) -> &'static str {
        "build"
    }

    fn init_env(&self, base: &mut BasePipeline) {
        let o = base.options();
        let mut build = layer(&[
            ("BUILD", "true"),
            ("CI", "true"),
            ("WERCKER_BUILD_ID", o.run_id.as_str()),
        ]);
        build.push((
            "WERCKER_BUILD_URL".to_string(),
            format!("{}#build/{}", o.base_url, o.run_id),
        ));
        build.extend(git_env(base));

        let common = base.common_env();
        let mirror = base.mirror_env();
        let passthru = base.passthru_env();

        let env = base.env_mut();
        env.reserve(&common);
        env.update(&build);
        env.update(&mirror);
        env.update(&passthru);
    }

    async fn collect_artifact(
        &self,
        base: &BasePipeline,
        session: &dyn Session,
        runtime: &dyn ContainerRuntime,
        guest: &ContainerHandle,
    ) -> Result<Artifact, PipelineError> {
        let guest_path = base.options().guest_path(&["output"]);
        base.collect_from(self.kind(), guest_path, session, runtime, guest)
            .await
    }

    fn docker_repo(&self, base: &BasePipeline) -> String {
        let o = base.options();
        format!("{}/{}", o.application_owner_name, o.application_name)
    }

    fn docker_tag(&self, base: &BasePipeline) -> String {
        branch_tag(base)
    }

    fn docker_message(&self, base: &BasePipeline) -> String {
        format!("Build {}", base.options().run_id)
    }
}
