//! Runtime backed by the `docker` command line client

use crate::runtime::{ContainerHandle, ContainerLogs, ContainerRuntime, ContainerSpec, RuntimeError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

/// Talks to the container runtime through `docker` subprocesses
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker_path: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(docker_path: impl Into<String>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }

    pub fn docker_path(&self) -> &str {
        &self.docker_path
    }

    /// Arguments for `docker create`
    pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];
        if spec.network_disabled {
            args.push("--network".to_string());
            args.push("none".to_string());
        }
        for (host, guest) in &spec.binds {
            args.push("-v".to_string());
            args.push(format!("{}:{}", host.display(), guest));
        }
        args.push(spec.image.clone());
        args.extend(spec.cmd.iter().cloned());
        args
    }

    async fn output(&self, args: &[String]) -> Result<Output, RuntimeError> {
        debug!("{} {}", self.docker_path, args.join(" "));
        let output = Command::new(&self.docker_path)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Run a docker command and return its trimmed stdout
    async fn run(&self, args: &[String]) -> Result<String, RuntimeError> {
        let output = self.output(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("docker {} exited with code {}: {}", args[0], exit_code, stderr.trim());
            return Err(RuntimeError::Command(format!(
                "docker {} exited with code {}: {}",
                args[0],
                exit_code,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let id = self.run(&Self::create_args(spec)).await?;
        if id.is_empty() {
            return Err(RuntimeError::Parse("docker create returned no id".to_string()));
        }
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.run(&["start".to_string(), handle.id.clone()]).await?;
        Ok(())
    }

    async fn wait_container(&self, handle: &ContainerHandle) -> Result<i64, RuntimeError> {
        let status = self.run(&["wait".to_string(), handle.id.clone()]).await?;
        status
            .parse::<i64>()
            .map_err(|_| RuntimeError::Parse(format!("exit status '{}'", status)))
    }

    async fn fetch_logs(&self, handle: &ContainerHandle) -> Result<ContainerLogs, RuntimeError> {
        let args = ["logs".to_string(), handle.id.clone()];
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(RuntimeError::Command(format!(
                "docker logs exited with code {}",
                output.status.code().unwrap_or(-1)
            )));
        }
        Ok(ContainerLogs {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.run(&["rm".to_string(), "-f".to_string(), handle.id.clone()])
            .await?;
        Ok(())
    }

    async fn copy_from_container(
        &self,
        handle: &ContainerHandle,
        guest_path: &str,
        host_path: &Path,
    ) -> Result<(), RuntimeError> {
        self.run(&[
            "cp".to_string(),
            format!("{}:{}", handle.id, guest_path),
            host_path.display().to_string(),
        ])
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_args() {
        let spec = ContainerSpec::new("wercker-service-redis-abc", "redis")
            .with_network_disabled(true)
            .with_bind("/tmp/src", "/mnt/source")
            .with_cmd(vec!["/bin/sh".to_string()]);

        assert_eq!(
            DockerCli::create_args(&spec),
            vec![
                "create",
                "--name",
                "wercker-service-redis-abc",
                "--network",
                "none",
                "-v",
                "/tmp/src:/mnt/source",
                "redis",
                "/bin/sh",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let docker = DockerCli::new("nonexistent-docker-binary");
        let handle = ContainerHandle {
            id: "x".to_string(),
            name: "x".to_string(),
        };
        let result = docker.start_container(&handle).await;
        assert!(matches!(result, Err(RuntimeError::Spawn(_))));
    }
}
