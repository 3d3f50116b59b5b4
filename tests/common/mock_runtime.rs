//! In-memory container runtime

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use wercker::runtime::{
    ContainerHandle, ContainerLogs, ContainerRuntime, ContainerSpec, RuntimeError,
};

/// How `wait_container` behaves for an image
#[derive(Clone)]
pub enum WaitBehavior {
    /// Exit immediately with the status
    Exit(i64),
    /// Exit with the status once the gate is notified
    Gate(Arc<Notify>, i64),
    /// Never exit
    Block,
    /// The wait itself fails
    Fail(String),
}

#[derive(Default)]
struct State {
    next_id: usize,
    created: Vec<ContainerSpec>,
    started: Vec<String>,
    removed: Vec<String>,
    copied: Vec<(String, String, PathBuf)>,
    images: HashMap<String, String>,
    log_fetches: HashMap<String, usize>,
    waits: HashMap<String, WaitBehavior>,
    logs: HashMap<String, ContainerLogs>,
    broken_logs: HashSet<String>,
    log_delays: HashMap<String, Duration>,
    fail_create: HashSet<String>,
    fail_start: HashSet<String>,
}

/// Runtime whose containers are configured per image
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait(self, image: &str, behavior: WaitBehavior) -> Self {
        self.state
            .lock()
            .unwrap()
            .waits
            .insert(image.to_string(), behavior);
        self
    }

    pub fn with_logs(self, image: &str, stdout: &str, stderr: &str) -> Self {
        self.state.lock().unwrap().logs.insert(
            image.to_string(),
            ContainerLogs {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
        self
    }

    pub fn with_broken_logs(self, image: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .broken_logs
            .insert(image.to_string());
        self
    }

    /// Reading logs takes this long
    pub fn with_log_delay(self, image: &str, delay: Duration) -> Self {
        self.state
            .lock()
            .unwrap()
            .log_delays
            .insert(image.to_string(), delay);
        self
    }

    pub fn failing_create(self, image: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_create
            .insert(image.to_string());
        self
    }

    pub fn failing_start(self, image: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_start
            .insert(image.to_string());
        self
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn copied(&self) -> Vec<(String, String, PathBuf)> {
        self.state.lock().unwrap().copied.clone()
    }

    /// How often logs were read for a container
    pub fn log_fetches(&self, container_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .log_fetches
            .get(container_id)
            .copied()
            .unwrap_or(0)
    }

    fn image_of(&self, handle: &ContainerHandle) -> String {
        self.state
            .lock()
            .unwrap()
            .images
            .get(&handle.id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create.contains(&spec.image) {
            return Err(RuntimeError::Command(format!("no such image: {}", spec.image)));
        }
        state.next_id += 1;
        let id = format!("c{}", state.next_id);
        state.created.push(spec.clone());
        state.images.insert(id.clone(), spec.image.clone());
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let image = self.image_of(handle);
        let mut state = self.state.lock().unwrap();
        if state.fail_start.contains(&image) {
            return Err(RuntimeError::Command(format!("cannot start {}", handle.id)));
        }
        state.started.push(handle.id.clone());
        Ok(())
    }

    async fn wait_container(&self, handle: &ContainerHandle) -> Result<i64, RuntimeError> {
        let image = self.image_of(handle);
        let behavior = self
            .state
            .lock()
            .unwrap()
            .waits
            .get(&image)
            .cloned()
            .unwrap_or(WaitBehavior::Block);

        match behavior {
            WaitBehavior::Exit(status) => Ok(status),
            WaitBehavior::Gate(gate, status) => {
                gate.notified().await;
                Ok(status)
            }
            WaitBehavior::Block => std::future::pending().await,
            WaitBehavior::Fail(error) => Err(RuntimeError::Command(error)),
        }
    }

    async fn fetch_logs(&self, handle: &ContainerHandle) -> Result<ContainerLogs, RuntimeError> {
        let image = self.image_of(handle);
        let delay = self.state.lock().unwrap().log_delays.get(&image).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        *state.log_fetches.entry(handle.id.clone()).or_insert(0) += 1;
        if state.broken_logs.contains(&image) {
            return Err(RuntimeError::Command("log stream closed".to_string()));
        }
        Ok(state.logs.get(&image).cloned().unwrap_or_default())
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.state.lock().unwrap().removed.push(handle.id.clone());
        Ok(())
    }

    async fn copy_from_container(
        &self,
        handle: &ContainerHandle,
        guest_path: &str,
        host_path: &Path,
    ) -> Result<(), RuntimeError> {
        fs::create_dir_all(host_path)?;
        fs::write(host_path.join("result.txt"), "ok")?;
        self.state.lock().unwrap().copied.push((
            handle.id.clone(),
            guest_path.to_string(),
            host_path.to_path_buf(),
        ));
        Ok(())
    }
}
