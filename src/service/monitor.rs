//! Background monitors for running service containers

use crate::execution::Cancellation;
use crate::runtime::{ContainerHandle, ContainerRuntime};
use crate::service::{write_state, ServiceEvent, ServiceState};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{debug, error, warn, Instrument};

/// Tracks the monitor tasks started during one run
///
/// Monitors report through the event channel handed in at construction.
/// [`ServiceMonitors::shutdown`] cancels whatever is still waiting for an
/// exit and joins every task, so nothing outlives the run. A monitor that has
/// already seen a failure finishes reading its logs first.
pub struct ServiceMonitors {
    tasks: JoinSet<()>,
    events: UnboundedSender<ServiceEvent>,
    cancel: Cancellation,
}

impl ServiceMonitors {
    pub fn new(events: UnboundedSender<ServiceEvent>) -> Self {
        Self {
            tasks: JoinSet::new(),
            events,
            cancel: Cancellation::new(),
        }
    }

    /// Number of monitors that have not been joined yet
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn watch(
        &mut self,
        service: String,
        handle: ContainerHandle,
        runtime: Arc<dyn ContainerRuntime>,
        state: Arc<Mutex<ServiceState>>,
    ) {
        let _ = self.events.send(ServiceEvent::Started {
            service: service.clone(),
            container_id: handle.id.clone(),
        });

        let events = self.events.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(
            monitor(service, handle, runtime, state, events, cancel).in_current_span(),
        );
    }

    /// Cancel outstanding monitors and wait for all of them to finish
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!("Service monitor ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ServiceMonitors {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn monitor(
    service: String,
    handle: ContainerHandle,
    runtime: Arc<dyn ContainerRuntime>,
    state: Arc<Mutex<ServiceState>>,
    events: UnboundedSender<ServiceEvent>,
    cancel: Cancellation,
) {
    let waited = tokio::select! {
        result = runtime.wait_container(&handle) => result,
        _ = cancel.cancelled() => {
            debug!("Stopped watching service {} ({})", service, handle.id);
            let _ = events.send(ServiceEvent::Detached {
                service,
                container_id: handle.id,
            });
            return;
        }
    };

    let status = match waited {
        Ok(status) => status,
        Err(e) => {
            error!("Error waiting for service {} ({}): {}", service, handle.id, e);
            write_state(&state, ServiceState::Faulted { error: e.to_string() });
            let _ = events.send(ServiceEvent::WaitFailed {
                service,
                container_id: handle.id,
                error: e.to_string(),
            });
            return;
        }
    };

    debug!(
        "Service container finished with status code: {} {}",
        status, handle.id
    );

    if status == 0 {
        write_state(&state, ServiceState::Completed);
        let _ = events.send(ServiceEvent::Completed {
            service,
            container_id: handle.id,
        });
        return;
    }

    write_state(&state, ServiceState::Failed { status });

    // Once the exit is observed the logs are always read, even during shutdown
    match runtime.fetch_logs(&handle).await {
        Ok(logs) => {
            let _ = events.send(ServiceEvent::Failed {
                service,
                container_id: handle.id,
                status,
                logs,
            });
        }
        Err(e) => {
            error!(
                "Unable to fetch logs for failed service {} ({}): {}",
                service, handle.id, e
            );
            write_state(&state, ServiceState::Faulted { error: e.to_string() });
            let _ = events.send(ServiceEvent::LogsUnavailable {
                service,
                container_id: handle.id,
                status,
                error: e.to_string(),
            });
        }
    }
}
