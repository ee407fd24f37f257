//! Container engine capabilities consumed by the provisioner.
//!
//! The lifecycle manager and the host path resolver only talk to the engine
//! through [`ContainerEngine`]. Real implementation: [`DockerEngine`]. Tests
//! provide an in-process fake.

pub mod docker;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::EngineError;

pub use docker::DockerEngine;

/// Result of an engine call that tolerates a missing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    NotFound,
}

/// How a mount point is backed on the engine host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    Volume,
    Other,
}

/// A mount as reported by container inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub kind: MountKind,
    /// Host-side source (bind path, or the volume's data path).
    pub source: String,
    /// Path inside the container.
    pub destination: String,
}

impl MountInfo {
    pub fn bind(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Bind,
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn volume(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Volume,
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// The subset of container inspection the provisioner relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub hostname: String,
    pub running: bool,
    pub mounts: Vec<MountInfo>,
}

/// Storage attached to a spawned container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSpec {
    Bind { source: String, target: String },
    Volume { name: String, target: String },
}

/// A TCP port exposed by the container and published on `host_ip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    pub port: u16,
    pub host_ip: String,
}

/// JSON-file log rotation limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRotation {
    pub max_size: String,
    pub max_file: u32,
}

impl Default for LogRotation {
    fn default() -> Self {
        Self {
            max_size: "10m".to_string(),
            max_file: 5,
        }
    }
}

/// Fully resolved container configuration handed to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub hostname: String,
    pub working_dir: String,
    pub env: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PublishedPort>,
    pub mounts: Vec<MountSpec>,
    pub network: Option<String>,
    pub cap_add: Vec<String>,
    pub log_rotation: LogRotation,
    /// Restart policy name, e.g. `unless-stopped`.
    pub restart_policy: String,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Daemon endpoint as a URL, e.g. `unix:///var/run/docker.sock`.
    fn daemon_endpoint(&self) -> String;

    /// Whether `reference` is present in the local image store.
    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError>;

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError>;

    /// Create a managed volume and return its name.
    async fn create_volume(&self, name: &str) -> Result<String, EngineError>;

    /// Create a container and return its engine identifier.
    async fn create_container(&self, name: &str, spec: &ContainerSpec)
    -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str) -> Result<Outcome, EngineError>;

    /// Force-remove a container together with its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<Outcome, EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, EngineError>;

    /// Identifiers of all running containers.
    async fn list_running(&self) -> Result<Vec<String>, EngineError>;
}
