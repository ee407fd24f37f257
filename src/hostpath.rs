//! Host path resolution for bind mounts.
//!
//! Containers spawned by this process receive bind-mount sources that must be
//! meaningful to the engine daemon, not to this process. When the
//! orchestrator itself runs in a container, the paths it sees are translated
//! through its own mounts.
//!
//! Both resolvers are best effort: any failure degrades to a safe fallback
//! and is logged, never returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{ContainerEngine, MountInfo, MountKind};
use crate::errors::EngineError;

/// Well-known daemon socket used when the configured endpoint is not local.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Finds the container this process runs in.
///
/// Real implementations: [`HostnameMatch`] and [`ContainerIdLookup`].
#[async_trait]
pub trait SelfInspector: Send + Sync {
    /// Mounts of the orchestrator's own container, or `None` when it is not
    /// containerized (or cannot be identified).
    async fn own_mounts(&self) -> Result<Option<Vec<MountInfo>>, EngineError>;
}

/// Identifies the orchestrator's container by matching the local hostname
/// against every running container's configured hostname.
///
/// Assumes hostnames are unique within the engine's scope.
pub struct HostnameMatch {
    engine: Arc<dyn ContainerEngine>,
    hostname: String,
}

impl HostnameMatch {
    pub fn new(engine: Arc<dyn ContainerEngine>, hostname: impl Into<String>) -> Self {
        Self {
            engine,
            hostname: hostname.into(),
        }
    }

    /// Use this machine's hostname.
    pub fn local(engine: Arc<dyn ContainerEngine>) -> std::io::Result<Self> {
        let hostname = hostname::get()?.to_string_lossy().into_owned();
        Ok(Self::new(engine, hostname))
    }
}

#[async_trait]
impl SelfInspector for HostnameMatch {
    async fn own_mounts(&self) -> Result<Option<Vec<MountInfo>>, EngineError> {
        if self.hostname.is_empty() {
            return Ok(None);
        }
        for id in self.engine.list_running().await? {
            let info = match self.engine.inspect_container(&id).await {
                Ok(info) => info,
                // Exited between list and inspect.
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if info.hostname == self.hostname {
                tracing::debug!(container_id = %info.id, hostname = %self.hostname, "Identified own container");
                return Ok(Some(info.mounts));
            }
        }
        Ok(None)
    }
}

/// Identifies the orchestrator's container from a self-reported identifier,
/// e.g. injected through the environment at deploy time.
pub struct ContainerIdLookup {
    engine: Arc<dyn ContainerEngine>,
    container_id: String,
}

impl ContainerIdLookup {
    pub fn new(engine: Arc<dyn ContainerEngine>, container_id: impl Into<String>) -> Self {
        Self {
            engine,
            container_id: container_id.into(),
        }
    }
}

#[async_trait]
impl SelfInspector for ContainerIdLookup {
    async fn own_mounts(&self) -> Result<Option<Vec<MountInfo>>, EngineError> {
        match self.engine.inspect_container(&self.container_id).await {
            Ok(info) => Ok(Some(info.mounts)),
            Err(EngineError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Resolve the host-side path of the engine's control socket.
///
/// Order: explicit override, then the endpoint itself when it is not a local
/// socket ([`DEFAULT_SOCKET_PATH`]), then the source of our own container's
/// mount of that socket, then the endpoint path unchanged.
pub async fn resolve_socket_path(
    socket_override: Option<&str>,
    endpoint: &str,
    inspector: &dyn SelfInspector,
) -> String {
    if let Some(path) = socket_override.filter(|p| !p.is_empty()) {
        return path.to_string();
    }

    let socket_path = endpoint.strip_prefix("unix://").unwrap_or(endpoint);
    let is_local = Path::new(socket_path)
        .symlink_metadata()
        .map(|meta| !meta.is_dir())
        .unwrap_or(false);
    if !is_local {
        tracing::debug!(endpoint, "Daemon endpoint is not a local socket, using default path");
        return DEFAULT_SOCKET_PATH.to_string();
    }

    match inspector.own_mounts().await {
        Ok(Some(mounts)) => mounts
            .iter()
            .find(|m| m.destination == socket_path)
            .map(|m| m.source.clone())
            .unwrap_or_else(|| socket_path.to_string()),
        Ok(None) => socket_path.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to inspect own container, using socket path as-is");
            socket_path.to_string()
        }
    }
}

/// Resolve the host-absolute directory backing `data_dir`.
///
/// `None` means "no usable host path": spawned containers get a managed volume
/// per flow instead of a bind mount.
pub async fn resolve_host_data_dir(
    work_dir_override: Option<&Path>,
    data_dir: &Path,
    inspector: &dyn SelfInspector,
) -> Option<PathBuf> {
    if let Some(dir) = work_dir_override {
        return Some(dir.to_path_buf());
    }

    match inspector.own_mounts().await {
        Ok(Some(mounts)) => host_path_from_mounts(&mounts, data_dir),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to inspect own container, falling back to managed volumes");
            None
        }
    }
}

/// Translate `data_dir` through the most specific mount containing it.
///
/// Only bind mounts translate; a volume-backed data directory has no host path
/// that other containers can share, so it yields `None`.
pub fn host_path_from_mounts(mounts: &[MountInfo], data_dir: &Path) -> Option<PathBuf> {
    let mount = mounts
        .iter()
        .filter(|m| !m.destination.is_empty() && data_dir.starts_with(&m.destination))
        .max_by_key(|m| Path::new(&m.destination).components().count())?;

    if mount.kind != MountKind::Bind {
        tracing::info!(
            destination = %mount.destination,
            "Data directory is backed by an engine-managed volume, not resolving a host path"
        );
        return None;
    }

    let rest = data_dir.strip_prefix(&mount.destination).ok()?;
    let source = PathBuf::from(&mount.source);
    if rest.as_os_str().is_empty() {
        Some(source)
    } else {
        Some(source.join(rest))
    }
}
