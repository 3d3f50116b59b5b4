//! Service containers: side dependencies that run next to the guest
//!
//! A service is created and started synchronously, then watched by a
//! background monitor. The monitor never blocks the pipeline. When a service
//! exits non-zero its logs are fetched once and delivered as a
//! [`ServiceEvent`] so the driver can show why it died.

pub mod monitor;

use crate::runtime::{ContainerHandle, ContainerLogs, ContainerRuntime, ContainerSpec, RuntimeError};
use regex::Regex;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tracing::{debug, info};

pub use monitor::ServiceMonitors;

/// Error types for service startup
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to create service container {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to start service container {name}: {source}")]
    Start {
        name: String,
        #[source]
        source: RuntimeError,
    },
}

/// Lifecycle of a service container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    /// Not created yet
    Pending,
    Created,
    Running,
    /// Exited with status 0
    Completed,
    /// Exited with a non-zero status
    Failed { status: i64 },
    /// Waiting on the container or reading its logs failed
    Faulted { error: String },
}

impl ServiceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceState::Completed | ServiceState::Failed { .. } | ServiceState::Faulted { .. }
        )
    }
}

/// Reports from service monitors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Started {
        service: String,
        container_id: String,
    },
    Completed {
        service: String,
        container_id: String,
    },
    Failed {
        service: String,
        container_id: String,
        status: i64,
        logs: ContainerLogs,
    },
    WaitFailed {
        service: String,
        container_id: String,
        error: String,
    },
    LogsUnavailable {
        service: String,
        container_id: String,
        status: i64,
        error: String,
    },
    /// The run ended before the service exited
    Detached {
        service: String,
        container_id: String,
    },
}

impl ServiceEvent {
    pub fn service(&self) -> &str {
        match self {
            ServiceEvent::Started { service, .. }
            | ServiceEvent::Completed { service, .. }
            | ServiceEvent::Failed { service, .. }
            | ServiceEvent::WaitFailed { service, .. }
            | ServiceEvent::LogsUnavailable { service, .. }
            | ServiceEvent::Detached { service, .. } => service,
        }
    }

    /// Whether this event means the service did not finish cleanly
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ServiceEvent::Failed { .. }
                | ServiceEvent::WaitFailed { .. }
                | ServiceEvent::LogsUnavailable { .. }
        )
    }
}

/// A service container owned for the lifetime of a run
pub struct ServiceContainer {
    /// Image name as declared in the run config
    name: String,
    network_disabled: bool,
    runtime: Arc<dyn ContainerRuntime>,
    container: Option<ContainerHandle>,
    state: Arc<Mutex<ServiceState>>,
}

fn invalid_name_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_.-]").expect("valid regex"))
}

impl ServiceContainer {
    pub fn new(
        name: impl Into<String>,
        network_disabled: bool,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            name: name.into(),
            network_disabled,
            runtime,
            container: None,
            state: Arc::new(Mutex::new(ServiceState::Pending)),
        }
    }

    /// Container name for a service in a given run
    ///
    /// Path separators, and anything else a container name cannot hold,
    /// become `-`.
    pub fn container_name(name: &str, run_id: &str) -> String {
        format!(
            "wercker-service-{}-{}",
            invalid_name_chars().replace_all(name, "-"),
            invalid_name_chars().replace_all(run_id, "-")
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network_disabled(&self) -> bool {
        self.network_disabled
    }

    /// The container, once created
    pub fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    pub fn state(&self) -> ServiceState {
        read_state(&self.state)
    }

    /// Create and start the service, then hand it to a background monitor
    ///
    /// Returns as soon as the container is running; the monitor's wait on
    /// the container is not awaited.
    pub async fn run(
        &mut self,
        run_id: &str,
        monitors: &mut ServiceMonitors,
    ) -> Result<ContainerHandle, ServiceError> {
        let container_name = Self::container_name(&self.name, run_id);
        debug!("Creating service container {} from {}", container_name, self.name);

        let spec = ContainerSpec::new(&container_name, &self.name)
            .with_network_disabled(self.network_disabled);

        let handle = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|source| ServiceError::Create {
                name: container_name.clone(),
                source,
            })?;

        // Recorded before starting so a failed start can still be cleaned up
        self.container = Some(handle.clone());
        write_state(&self.state, ServiceState::Created);

        self.runtime
            .start_container(&handle)
            .await
            .map_err(|source| ServiceError::Start {
                name: container_name.clone(),
                source,
            })?;

        write_state(&self.state, ServiceState::Running);
        info!("Started service {} ({})", self.name, handle.id);

        monitors.watch(
            self.name.clone(),
            handle.clone(),
            self.runtime.clone(),
            self.state.clone(),
        );

        Ok(handle)
    }

    /// Force-remove the container if one was created
    pub async fn remove(&self) -> Result<(), RuntimeError> {
        if let Some(handle) = &self.container {
            debug!("Removing service container {}", handle.name);
            self.runtime.remove_container(handle).await?;
        }
        Ok(())
    }
}

pub(crate) fn read_state(state: &Mutex<ServiceState>) -> ServiceState {
    match state.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub(crate) fn write_state(state: &Mutex<ServiceState>, next: ServiceState) {
    match state.lock() {
        Ok(mut guard) => *guard = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}
