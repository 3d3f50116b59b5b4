//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{config::ServiceConfig, Artifact, ExecutionStatus, Pipeline, PipelineError},
    execution::Cancellation,
    runtime::{ContainerHandle, ContainerRuntime, ContainerSpec},
    service::{ServiceContainer, ServiceEvent, ServiceMonitors},
    session::{Session, SessionConnector},
    store::LocalStore,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: String,
        kind: &'static str,
    },
    StepsFetched {
        count: usize,
    },
    GuestStarted {
        container_id: String,
        image: String,
    },
    Service(ServiceEvent),
    StepStarted {
        step_id: String,
        name: String,
        index: usize,
        total: usize,
    },
    StepCompleted {
        step_id: String,
        name: String,
    },
    StepFailed {
        step_id: String,
        name: String,
        error: String,
    },
    ArtifactCollected {
        artifact: Artifact,
        stored: Vec<PathBuf>,
    },
    PipelineCompleted {
        run_id: String,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// What the guest and its services are made of
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Image the guest is created from
    pub box_image: String,

    pub services: Vec<ServiceConfig>,

    /// Treat a failed service as a failed run
    pub fail_on_service_error: bool,

    /// Leave containers in place after the run
    pub keep_containers: bool,
}

/// Image coordinates a successful run would be committed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub repository: String,
    pub tag: String,
    pub message: String,
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub artifact: Artifact,

    /// Files written to the local store, if one is configured
    pub stored: Vec<PathBuf>,

    pub image: ImageInfo,

    /// Services that did not finish cleanly during the run
    pub service_failures: Vec<ServiceEvent>,
}

/// Containers created during a run, removed when it ends
#[derive(Default)]
struct RunResources {
    guest: Option<ContainerHandle>,
    services: Vec<ServiceContainer>,
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    runtime: Arc<dyn ContainerRuntime>,
    connector: Arc<dyn SessionConnector>,
    settings: EngineSettings,
    store: Option<LocalStore>,
    cancel: Cancellation,
    event_handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl ExecutionEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        connector: Arc<dyn SessionConnector>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            runtime,
            connector,
            settings,
            store: None,
            cancel: Cancellation::new(),
            event_handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Store artifacts in a local content store
    pub fn with_store(mut self, store: LocalStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Token that cancels the run in progress
    pub fn cancellation(&self) -> Cancellation {
        self.cancel.clone()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.event_handlers.write() {
            handlers.push(Arc::new(handler));
        }
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        emit(&self.event_handlers, event);
    }

    /// Execute the entire pipeline
    pub async fn execute(&self, pipeline: &mut Pipeline) -> Result<RunOutcome, PipelineError> {
        let run_id = pipeline.options().run_id.clone();
        info!("Starting {} {}", pipeline.kind(), run_id);
        self.emit_event(ExecutionEvent::PipelineStarted {
            run_id: run_id.clone(),
            kind: pipeline.kind(),
        });

        let total_steps = pipeline.steps().len();
        pipeline.state.start(total_steps);

        let failures: Arc<Mutex<Vec<ServiceEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ServiceEvent>();
        let forwarder = {
            let handlers = self.event_handlers.clone();
            let failures = failures.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    if event.is_failure() {
                        if let Ok(mut failures) = failures.lock() {
                            failures.push(event.clone());
                        }
                    }
                    emit(&handlers, ExecutionEvent::Service(event));
                }
            })
        };

        let mut monitors = ServiceMonitors::new(events_tx);
        let mut resources = RunResources::default();

        let span = info_span!("run", run_id = %run_id, kind = pipeline.kind());
        let mut result = self
            .run_stages(pipeline, &mut monitors, &mut resources, &failures)
            .instrument(span)
            .await;

        // Monitors hold the only senders; once joined the forwarder drains and exits
        monitors.shutdown().await;
        drop(monitors);
        if let Err(e) = forwarder.await {
            warn!("Service event forwarder ended abnormally: {}", e);
        }

        self.cleanup(&resources).await;

        let service_failures = snapshot(&failures);
        if let Ok(outcome) = &mut result {
            outcome.service_failures = service_failures.clone();
            if self.settings.fail_on_service_error {
                if let Some(failure) = service_failures.first() {
                    result = Err(service_failed(failure));
                }
            }
        }

        let status = match &result {
            Ok(_) => {
                pipeline.state.complete();
                ExecutionStatus::Completed
            }
            Err(e) if e.is_cancelled() => {
                warn!("{} {} cancelled", pipeline.kind(), run_id);
                pipeline.state.cancel();
                ExecutionStatus::Cancelled
            }
            Err(e) => {
                error!("{} {} failed: {}", pipeline.kind(), run_id, e);
                pipeline.state.fail();
                ExecutionStatus::Failed
            }
        };

        info!("Pipeline execution finished: {} - {:?}", run_id, status);
        self.emit_event(ExecutionEvent::PipelineCompleted { run_id, status });

        result
    }

    async fn run_stages(
        &self,
        pipeline: &mut Pipeline,
        monitors: &mut ServiceMonitors,
        resources: &mut RunResources,
        failures: &Mutex<Vec<ServiceEvent>>,
    ) -> Result<RunOutcome, PipelineError> {
        pipeline.fetch_steps()?;
        self.emit_event(ExecutionEvent::StepsFetched {
            count: pipeline.steps().len(),
        });

        let guest = self.start_guest(pipeline, resources).await?;

        let run_id = pipeline.options().run_id.clone();
        for service in &self.settings.services {
            let mut container = ServiceContainer::new(
                service.name(),
                service.network_disabled(),
                self.runtime.clone(),
            );
            let started = container.run(&run_id, monitors).await;
            resources.services.push(container);
            started?;
        }

        let session = self.connector.open(&guest, self.cancel.clone()).await?;
        let session: &dyn Session = session.as_ref();

        pipeline.setup_guest(session).await?;

        pipeline.init_env();
        pipeline.log_environment();
        pipeline.export_environment(session).await?;

        self.run_steps(pipeline, session, failures).await?;

        let artifact = pipeline
            .collect_artifact(session, self.runtime.as_ref(), &guest)
            .await?;

        let stored = match &self.store {
            Some(store) => store.store_tree(&artifact.key(), &artifact.host_path)?,
            None => Vec::new(),
        };

        self.emit_event(ExecutionEvent::ArtifactCollected {
            artifact: artifact.clone(),
            stored: stored.clone(),
        });

        Ok(RunOutcome {
            artifact,
            stored,
            image: ImageInfo {
                repository: pipeline.docker_repo(),
                tag: pipeline.docker_tag(),
                message: pipeline.docker_message(),
            },
            service_failures: Vec::new(),
        })
    }

    /// Create and start the guest with the source and steps mounted
    async fn start_guest(
        &self,
        pipeline: &Pipeline,
        resources: &mut RunResources,
    ) -> Result<ContainerHandle, PipelineError> {
        let options = pipeline.options();
        let steps_dir = options.host_path(&["steps"]);
        std::fs::create_dir_all(&steps_dir).map_err(|e| PipelineError::Fetch {
            id: "steps".to_string(),
            reason: format!("{}: {}", steps_dir.display(), e),
        })?;

        let spec = ContainerSpec::new(
            format!("wercker-{}-{}", pipeline.kind(), options.run_id),
            &self.settings.box_image,
        )
        .with_bind(options.project_path.clone(), options.mnt_path(&["source"]))
        .with_bind(steps_dir, options.mnt_path(&["steps"]))
        .with_cmd(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "while true; do sleep 3600; done".to_string(),
        ]);

        let guest = self.runtime.create_container(&spec).await?;
        resources.guest = Some(guest.clone());
        self.runtime.start_container(&guest).await?;

        debug!("Guest {} running from {}", guest.id, self.settings.box_image);
        self.emit_event(ExecutionEvent::GuestStarted {
            container_id: guest.id.clone(),
            image: self.settings.box_image.clone(),
        });
        Ok(guest)
    }

    /// Run every step in declared order, stopping at the first failure
    async fn run_steps(
        &self,
        pipeline: &mut Pipeline,
        session: &dyn Session,
        failures: &Mutex<Vec<ServiceEvent>>,
    ) -> Result<(), PipelineError> {
        let total = pipeline.steps().len();

        for index in 0..total {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if self.settings.fail_on_service_error {
                if let Some(failure) = snapshot(failures).first() {
                    pipeline
                        .base_mut()
                        .skip_remaining(index, "service failed");
                    return Err(service_failed(failure));
                }
            }

            let (step_id, name) = {
                let step = &pipeline.steps()[index];
                (step.id.clone(), step.name.clone())
            };
            self.emit_event(ExecutionEvent::StepStarted {
                step_id: step_id.clone(),
                name: name.clone(),
                index,
                total,
            });

            match pipeline.base_mut().run_step(index, session).await {
                Ok(()) => {
                    pipeline.state.completed_steps += 1;
                    self.emit_event(ExecutionEvent::StepCompleted { step_id, name });
                }
                Err(e) => {
                    pipeline.state.failed_steps += 1;
                    self.emit_event(ExecutionEvent::StepFailed {
                        step_id,
                        name,
                        error: e.to_string(),
                    });
                    pipeline
                        .base_mut()
                        .skip_remaining(index + 1, "previous step failed");
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn cleanup(&self, resources: &RunResources) {
        if self.settings.keep_containers {
            return;
        }

        for service in &resources.services {
            if let Err(e) = service.remove().await {
                warn!("Failed to remove service {}: {}", service.name(), e);
            }
        }
        if let Some(guest) = &resources.guest {
            if let Err(e) = self.runtime.remove_container(guest).await {
                warn!("Failed to remove guest {}: {}", guest.id, e);
            }
        }
    }
}

fn emit(handlers: &RwLock<Vec<EventHandler>>, event: ExecutionEvent) {
    if let Ok(handlers) = handlers.read() {
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

fn snapshot(failures: &Mutex<Vec<ServiceEvent>>) -> Vec<ServiceEvent> {
    failures.lock().map(|f| f.clone()).unwrap_or_default()
}

fn service_failed(event: &ServiceEvent) -> PipelineError {
    let reason = match event {
        ServiceEvent::Failed { status, .. } | ServiceEvent::LogsUnavailable { status, .. } => {
            format!("exited with status {}", status)
        }
        ServiceEvent::WaitFailed { error, .. } => error.clone(),
        _ => "did not finish cleanly".to_string(),
    };
    PipelineError::ServiceFailed {
        service: event.service().to_string(),
        reason,
    }
}
