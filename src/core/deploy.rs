//! Deploy pipelines

use crate::core::{
    artifact::Artifact,
    build::{branch_tag, git_env},
    environment::layer,
    error::PipelineError,
    pipeline::{BasePipeline, PipelineKind},
};
use crate::runtime::{ContainerHandle, ContainerRuntime};
use crate::session::Session;
use async_trait::async_trait;

/// Deploys ship a previously built source tree to a target
#[derive(Debug, Clone, Copy, Default)]
pub struct Deploy;

#[async_trait]
impl PipelineKind for Deploy {
    fn kind(&self) -> &'static str {
        "deploy"
    }

    fn init_env(&self, base: &mut BasePipeline) {
        let o = base.options();
        let mut deploy = layer(&[
            ("DEPLOY", "true"),
            ("CI", "true"),
            ("WERCKER_DEPLOY_ID", o.run_id.as_str()),
        ]);
        deploy.push((
            "WERCKER_DEPLOY_URL".to_string(),
            format!("{}#deploy/{}", o.base_url, o.run_id),
        ));
        deploy.push((
            "WERCKER_DEPLOYTARGET_NAME".to_string(),
            o.deploy_target.clone(),
        ));
        deploy.extend(git_env(base));

        let common = base.common_env();
        let mirror = base.mirror_env();
        let passthru = base.passthru_env();

        let env = base.env_mut();
        env.reserve(&common);
        env.update(&deploy);
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
        let guest_path = base.options().guest_path(&["source"]);
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
        format!("Deploy {}", base.options().run_id)
    }
}
