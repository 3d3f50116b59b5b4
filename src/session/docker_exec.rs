//! Session backed by a persistent `docker exec` shell

use crate::execution::Cancellation;
use crate::runtime::ContainerHandle;
use crate::session::{CommandOutcome, Session, SessionConnector, SessionError};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

/// A long-lived shell inside the guest
///
/// Every batch is followed by an echo of a per-batch sentinel and `$?`, so
/// the exit status of the last command can be read back from stdout.
/// Exported variables persist across batches because the shell does.
pub struct DockerExecSession {
    container_id: String,
    shell: Mutex<Shell>,
    logs_visible: AtomicBool,
    timeout_secs: Option<u64>,
    cancel: Cancellation,
}

struct Shell {
    // Held so the process is killed when the session drops
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl DockerExecSession {
    /// Attach a shell to a running container
    ///
    /// # Arguments
    /// * `docker_path` - Path to the docker executable
    /// * `container_id` - Guest container to attach to
    /// * `timeout_secs` - Per-batch timeout, `None` waits indefinitely
    /// * `cancel` - Run-scoped cancellation
    pub async fn open(
        docker_path: &str,
        container_id: &str,
        timeout_secs: Option<u64>,
        cancel: Cancellation,
    ) -> Result<Self, SessionError> {
        debug!("Opening shell session in container {}", container_id);

        let mut child = Command::new(docker_path)
            .args(["exec", "-i", container_id, "/bin/sh"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Open(format!("Failed to spawn docker exec: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Open("shell stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Open("shell stdout unavailable".to_string()))?;

        let mut shell = Shell {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        // Fold stderr into stdout so output is captured in order
        shell.stdin.write_all(b"exec 2>&1\n").await?;
        shell.stdin.flush().await?;

        Ok(Self {
            container_id: container_id.to_string(),
            shell: Mutex::new(shell),
            logs_visible: AtomicBool::new(true),
            timeout_secs,
            cancel,
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    async fn exchange(&self, commands: &[String]) -> Result<CommandOutcome, SessionError> {
        let visible = self.logs_visible();
        let sentinel = format!("wercker-sentinel-{}", uuid::Uuid::new_v4().simple());
        let mut shell = self.shell.lock().await;

        for command in commands {
            if visible {
                info!("$ {}", command);
            } else {
                debug!("$ {}", command);
            }
            shell.stdin.write_all(command.as_bytes()).await?;
            shell.stdin.write_all(b"\n").await?;
        }
        shell
            .stdin
            .write_all(format!("printf '\\n%s %s\\n' {} \"$?\"\n", sentinel).as_bytes())
            .await?;
        shell.stdin.flush().await?;

        let mut lines: Vec<String> = Vec::new();
        loop {
            let line = shell
                .stdout
                .next_line()
                .await?
                .ok_or(SessionError::Closed)?;

            if let Some(rest) = line.strip_prefix(&sentinel) {
                let exit_code = rest
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| SessionError::Protocol(rest.trim().to_string()))?;
                // The separator newline shows up as an empty line when the
                // output already ended with one
                if lines.last().is_some_and(|l| l.is_empty()) {
                    lines.pop();
                }
                return Ok(CommandOutcome {
                    exit_code,
                    output: lines.join("\n"),
                });
            }

            if visible {
                info!("{}", line);
            } else {
                debug!("{}", line);
            }
            lines.push(line);
        }
    }
}

#[async_trait]
impl Session for DockerExecSession {
    async fn send_checked(&self, commands: &[String]) -> Result<CommandOutcome, SessionError> {
        let exchange = async {
            match self.timeout_secs {
                Some(secs) => timeout(Duration::from_secs(secs), self.exchange(commands))
                    .await
                    .map_err(|_| SessionError::Timeout(secs))?,
                None => self.exchange(commands).await,
            }
        };

        tokio::select! {
            result = exchange => result,
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
        }
    }

    fn hide_logs(&self) {
        self.logs_visible.store(false, Ordering::SeqCst);
    }

    fn show_logs(&self) {
        self.logs_visible.store(true, Ordering::SeqCst);
    }

    fn logs_visible(&self) -> bool {
        self.logs_visible.load(Ordering::SeqCst)
    }
}

/// Opens [`DockerExecSession`]s
#[derive(Debug, Clone)]
pub struct DockerExecConnector {
    docker_path: String,
    timeout_secs: Option<u64>,
}

impl DockerExecConnector {
    pub fn new(docker_path: impl Into<String>, timeout_secs: Option<u64>) -> Self {
        Self {
            docker_path: docker_path.into(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl SessionConnector for DockerExecConnector {
    async fn open(
        &self,
        guest: &ContainerHandle,
        cancel: Cancellation,
    ) -> Result<Box<dyn Session>, SessionError> {
        let session =
            DockerExecSession::open(&self.docker_path, &guest.id, self.timeout_secs, cancel).await?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires docker and a running container named wercker-test
    async fn test_exported_variables_persist() {
        let session = DockerExecSession::open("docker", "wercker-test", Some(30), Cancellation::new())
            .await
            .unwrap();

        let outcome = session
            .send_checked(&["export GREETING='hi'".to_string()])
            .await
            .unwrap();
        assert!(outcome.success());

        let outcome = session
            .send_checked(&["echo $GREETING".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.output, "hi");
    }

    #[tokio::test]
    #[ignore]
    async fn test_exit_status_is_reported() {
        let session = DockerExecSession::open("docker", "wercker-test", Some(30), Cancellation::new())
            .await
            .unwrap();

        let outcome = session.send_checked(&["false".to_string()]).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
    }

    #[tokio::test]
    async fn test_open_with_missing_binary_fails() {
        let result = DockerExecSession::open(
            "nonexistent-docker-binary",
            "whatever",
            Some(1),
            Cancellation::new(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::Open(_))));
    }
}
