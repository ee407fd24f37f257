//! In-process container engine fake and harness shared by integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flowbox::engine::{ContainerEngine, ContainerInfo, ContainerSpec, MountInfo, Outcome};
use flowbox::{EngineError, LifecycleManager, Records, SqliteStore, Topology};

pub const DEFAULT_IMAGE: &str = "debian:latest";

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub name: String,
    pub spec: ContainerSpec,
    pub running: bool,
    /// Mounts reported by inspect.
    pub mounts: Vec<MountInfo>,
}

#[derive(Default)]
pub struct FakeState {
    pub images: HashSet<String>,
    pub volumes: Vec<String>,
    pub containers: HashMap<String, FakeContainer>,
    pub removed: Vec<String>,
    /// Every pull attempted, in order.
    pub pulls: Vec<String>,
    /// Listed as running but gone by the time they are inspected.
    pub vanished: Vec<String>,
    /// Image references whose pull fails.
    pub fail_pull: HashSet<String>,
    pub fail_create: bool,
    pub fail_start: bool,
    /// Engine ids whose removal fails with a daemon error.
    pub fail_remove: HashSet<String>,
    next_id: u64,
}

#[derive(Default)]
pub struct FakeEngine {
    pub state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        let engine = Self::default();
        engine
            .state
            .lock()
            .unwrap()
            .images
            .insert(DEFAULT_IMAGE.to_string());
        Arc::new(engine)
    }

    pub fn with_state(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock().unwrap());
    }

    /// Register a running container directly, bypassing spawn.
    pub fn add_running(&self, name: &str) -> String {
        self.add_running_with(name, "", Vec::new())
    }

    pub fn add_running_with(&self, name: &str, hostname: &str, mounts: Vec<MountInfo>) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                name: name.to_string(),
                spec: ContainerSpec {
                    hostname: hostname.to_string(),
                    ..Default::default()
                },
                running: true,
                mounts,
            },
        );
        id
    }

    pub fn has_container_named(&self, name: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.containers.values().any(|c| c.name == name)
    }

    pub fn pulls(&self) -> Vec<String> {
        self.state.lock().unwrap().pulls.clone()
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(id).cloned()
    }

    pub fn last_spec(&self) -> ContainerSpec {
        let state = self.state.lock().unwrap();
        let id = format!("fake-{}", state.next_id);
        state.containers[&id].spec.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }
}

impl FakeState {
    /// The engine accepts either the container id or its name.
    fn resolve(&self, key: &str) -> Option<String> {
        if self.containers.contains_key(key) {
            return Some(key.to_string());
        }
        self.containers
            .iter()
            .find(|(_, c)| c.name == key)
            .map(|(id, _)| id.clone())
    }
}

fn daemon_error(message: &str) -> EngineError {
    EngineError::Daemon {
        status: 500,
        message: message.to_string(),
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    fn daemon_endpoint(&self) -> String {
        "unix:///var/run/docker.sock".to_string()
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        Ok(self.state.lock().unwrap().images.contains(reference))
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.pulls.push(reference.to_string());
        if state.fail_pull.contains(reference) {
            return Err(daemon_error("pull access denied"));
        }
        state.images.insert(reference.to_string());
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<String, EngineError> {
        self.state.lock().unwrap().volumes.push(name.to_string());
        Ok(name.to_string())
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(daemon_error("conflict"));
        }
        if !state.images.contains(&spec.image) {
            return Err(EngineError::NotFound(format!("No such image: {}", spec.image)));
        }
        if state.resolve(name).is_some() {
            return Err(EngineError::Daemon {
                status: 409,
                message: format!("name {} is already in use", name),
            });
        }
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                name: name.to_string(),
                spec: spec.clone(),
                running: false,
                mounts: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_start {
            return Err(daemon_error("port is already allocated"));
        }
        match state.containers.get_mut(id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    async fn stop_container(&self, id: &str) -> Result<Outcome, EngineError> {
        let mut state = self.state.lock().unwrap();
        let Some(key) = state.resolve(id) else {
            return Ok(Outcome::NotFound);
        };
        if let Some(container) = state.containers.get_mut(&key) {
            container.running = false;
        }
        Ok(Outcome::Done)
    }

    async fn remove_container(&self, id: &str) -> Result<Outcome, EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remove.contains(id) {
            return Err(daemon_error("removal already in progress"));
        }
        match state.resolve(id) {
            Some(key) => {
                state.containers.remove(&key);
                state.removed.push(key);
                Ok(Outcome::Done)
            }
            None => Ok(Outcome::NotFound),
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, EngineError> {
        let state = self.state.lock().unwrap();
        let key = state
            .resolve(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let container = &state.containers[&key];
        Ok(ContainerInfo {
            id: key.clone(),
            hostname: container.spec.hostname.clone(),
            running: container.running,
            mounts: container.mounts.clone(),
        })
    }

    async fn list_running(&self) -> Result<Vec<String>, EngineError> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state.vanished.clone();
        ids.extend(
            state
                .containers
                .iter()
                .filter(|(_, c)| c.running)
                .map(|(id, _)| id.clone()),
        );
        Ok(ids)
    }
}

pub fn topology(data_dir: &Path, host_data_dir: Option<PathBuf>) -> Topology {
    Topology {
        inside: false,
        net_admin: false,
        socket_path: "/var/run/docker.sock".to_string(),
        data_dir: data_dir.to_path_buf(),
        host_data_dir,
        network: None,
        public_ip: "0.0.0.0".to_string(),
        default_image: DEFAULT_IMAGE.to_string(),
    }
}

pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub store: Arc<SqliteStore>,
    pub manager: Arc<LifecycleManager>,
    pub _data: tempfile::TempDir,
}

impl Harness {
    /// Bind-mount topology where the host path equals the local data dir.
    pub fn new() -> Self {
        Self::build(|dir| topology(dir, Some(dir.to_path_buf())))
    }

    pub fn build(make_topology: impl FnOnce(&Path) -> Topology) -> Self {
        let data = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let manager = LifecycleManager::new(
            engine.clone(),
            Records::new(store.clone()),
            Arc::new(make_topology(data.path())),
        );
        Self {
            engine,
            store,
            manager: Arc::new(manager),
            _data: data,
        }
    }
}
