//! Container lifecycle: spawn, stop, delete and liveness queries.
//!
//! Every engine action is paired with a write to the container record. The
//! record is created (`starting`) before the engine is asked to create
//! anything, and each status flip happens only once the corresponding engine
//! result is known. A crash between the two leaves a `starting` record for a
//! container the engine may already hold; startup reconciliation repairs it.

use std::collections::HashMap;
use std::sync::Arc;

use flowbox_common::{Container, ContainerStatus, ContainerType, NewContainer, flow_ports};
use sha2::{Digest, Sha256};

use crate::config::ProvisionerConfig;
use crate::engine::{
    ContainerEngine, ContainerSpec, LogRotation, MountSpec, Outcome, PublishedPort,
};
use crate::errors::{EngineError, ProvisionError};
use crate::store::{RecordStore, Records};
use crate::topology::{Topology, self_inspector};

/// Working directory inside spawned containers.
pub const CONTAINER_WORK_DIR: &str = "/work";

/// Where the daemon socket is mounted when the orchestrator is containerized.
pub const CONTAINER_SOCKET_PATH: &str = "/var/run/docker.sock";

pub const RESTART_POLICY: &str = "unless-stopped";

pub const LABEL_FLOW_ID: &str = "flowbox.flow_id";
pub const LABEL_CONTAINER_TYPE: &str = "flowbox.container_type";

/// Capabilities granted when NET_ADMIN is enabled.
const NET_ADMIN_CAPS: [&str; 2] = ["NET_RAW", "NET_ADMIN"];

/// Caller-supplied base configuration for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerTemplate {
    pub image: String,
    pub env: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
}

impl ContainerTemplate {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }
}

/// Drives container records through `starting → running → stopped → deleted`
/// (or `failed`), keeping them in step with the engine.
pub struct LifecycleManager {
    engine: Arc<dyn ContainerEngine>,
    records: Records,
    topology: Arc<Topology>,
}

impl LifecycleManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, records: Records, topology: Arc<Topology>) -> Self {
        Self {
            engine,
            records,
            topology,
        }
    }

    /// Resolve the topology once by introspection and build a manager.
    pub async fn connect(
        config: &ProvisionerConfig,
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let inspector = self_inspector(config, engine.clone());
        let topology = Topology::resolve(config, engine.as_ref(), inspector.as_ref()).await;
        Self::new(engine, Records::new(store), Arc::new(topology))
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    /// Create and start a container for `flow_id`, returning its record.
    ///
    /// An image that cannot be pulled is replaced by the default image. Engine
    /// failures during create or start leave the record `failed`.
    pub async fn spawn(
        &self,
        name: &str,
        container_type: ContainerType,
        flow_id: i64,
        template: Option<&ContainerTemplate>,
    ) -> Result<Container, ProvisionError> {
        let template = template.ok_or_else(|| {
            ProvisionError::Configuration(format!("no base config supplied for {}", name))
        })?;
        if template.image.trim().is_empty() {
            return Err(ProvisionError::Configuration(format!(
                "no image configured for {}",
                name
            )));
        }

        let flow_dir = self.topology.flow_dir(flow_id);
        tokio::fs::create_dir_all(&flow_dir)
            .await
            .map_err(|source| ProvisionError::Workspace {
                path: flow_dir.clone(),
                source,
            })?;

        let host_dir = self.topology.host_flow_dir(flow_id);
        let record = self
            .records
            .create_container(NewContainer {
                container_type,
                name: name.to_string(),
                image: template.image.clone(),
                status: ContainerStatus::Starting,
                local_id: String::new(),
                local_dir: host_dir
                    .as_ref()
                    .map(|dir| dir.display().to_string())
                    .unwrap_or_default(),
                flow_id,
            })
            .await?;
        tracing::info!(
            flow_id,
            container_id = record.id,
            name,
            image = %template.image,
            "Spawning container"
        );

        let image = self.ensure_image(&template.image, record.id).await?;

        let work_mount = match &host_dir {
            Some(dir) => MountSpec::Bind {
                source: dir.display().to_string(),
                target: CONTAINER_WORK_DIR.to_string(),
            },
            None => {
                let volume = flow_volume_name(flow_id);
                match self.engine.create_volume(&volume).await {
                    Ok(name) => MountSpec::Volume {
                        name,
                        target: CONTAINER_WORK_DIR.to_string(),
                    },
                    Err(e) => {
                        tracing::error!(flow_id, container_id = record.id, error = %e, "Failed to create flow volume");
                        self.records.mark_failed(record.id, None).await?;
                        return Err(ProvisionError::engine("create_volume", e));
                    }
                }
            }
        };

        let spec = self.build_spec(name, container_type, flow_id, template, image, work_mount);

        let local_id = match self.engine.create_container(name, &spec).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(flow_id, container_id = record.id, error = %e, "Failed to create container");
                self.records.mark_failed(record.id, None).await?;
                return Err(ProvisionError::engine("create", e));
            }
        };
        self.records.mark_created(record.id, &local_id).await?;

        if let Err(e) = self.engine.start_container(&local_id).await {
            tracing::error!(flow_id, container_id = record.id, local_id = %local_id, error = %e, "Failed to start container");
            self.records.mark_failed(record.id, Some(&local_id)).await?;
            return Err(ProvisionError::engine("start", e));
        }

        let record = self.records.mark_running(record.id, &local_id).await?;
        tracing::info!(flow_id, container_id = record.id, local_id = %local_id, "Container running");
        Ok(record)
    }

    /// Stop a container and record it as `stopped`.
    ///
    /// A container the engine no longer knows is treated as already stopped.
    /// An empty `local_id` skips the engine call.
    pub async fn stop(&self, local_id: &str, container_id: i64) -> Result<(), ProvisionError> {
        if local_id.is_empty() {
            tracing::debug!(container_id, "No engine id recorded, nothing to stop");
        } else {
            self.stop_in_engine(local_id, container_id).await?;
        }
        self.records.mark_stopped(container_id).await?;
        Ok(())
    }

    /// Stop, force-remove (with volumes) and record the container as `deleted`.
    ///
    /// The record passes through `stopped` and always ends `deleted`, also
    /// when it was already `deleted` or `failed`.
    pub async fn delete(&self, local_id: &str, container_id: i64) -> Result<(), ProvisionError> {
        self.stop(local_id, container_id).await?;
        if !local_id.is_empty() {
            self.remove_in_engine(local_id, container_id).await?;
        }
        self.records.mark_deleted(container_id).await?;
        Ok(())
    }

    /// Delete the container behind `record`, addressing it by name when no
    /// engine id was recorded.
    ///
    /// Covers a crash between engine create and the id write: the engine may
    /// hold a container the record cannot name by id.
    pub async fn release(&self, record: &Container) -> Result<(), ProvisionError> {
        let target = engine_ref(record);
        if !target.is_empty() {
            self.stop_in_engine(target, record.id).await?;
        }
        self.records.mark_stopped(record.id).await?;
        if !target.is_empty() {
            self.remove_in_engine(target, record.id).await?;
        }
        self.records.mark_deleted(record.id).await?;
        Ok(())
    }

    async fn stop_in_engine(&self, target: &str, container_id: i64) -> Result<(), ProvisionError> {
        match self.engine.stop_container(target).await {
            Ok(Outcome::Done) => {
                tracing::info!(container_id, target, "Container stopped");
            }
            Ok(Outcome::NotFound) => {
                tracing::warn!(container_id, target, "Container not found, treating as stopped");
            }
            Err(e) => return Err(ProvisionError::engine("stop", e)),
        }
        Ok(())
    }

    async fn remove_in_engine(&self, target: &str, container_id: i64) -> Result<(), ProvisionError> {
        match self.engine.remove_container(target).await {
            Ok(Outcome::Done) => {
                tracing::info!(container_id, target, "Container removed");
            }
            Ok(Outcome::NotFound) => {
                tracing::warn!(container_id, target, "Container not found, treating as removed");
            }
            Err(e) => return Err(ProvisionError::engine("remove", e)),
        }
        Ok(())
    }

    /// Whether the engine reports the container as running.
    ///
    /// Inspection errors, including an unknown id, are returned as-is.
    pub async fn is_running(&self, local_id: &str) -> Result<bool, ProvisionError> {
        self.engine
            .inspect_container(local_id)
            .await
            .map(|info| info.running)
            .map_err(|e| ProvisionError::engine("inspect", e))
    }

    /// Make sure `image` is available locally, substituting the default image
    /// (and recording the substitution) when it cannot be pulled.
    ///
    /// The record is marked `failed` only when the default image is
    /// unavailable too.
    async fn ensure_image(&self, image: &str, container_id: i64) -> Result<String, ProvisionError> {
        let err = match self.make_available(image).await {
            Ok(()) => return Ok(image.to_string()),
            Err(e) => e,
        };

        let fallback = self.topology.default_image.clone();
        if fallback == image {
            tracing::error!(container_id, image, error = %err, "Failed to pull default image");
            self.records.mark_failed(container_id, None).await?;
            return Err(ProvisionError::engine("pull", err));
        }
        tracing::warn!(
            container_id,
            image,
            fallback = %fallback,
            error = %err,
            "Failed to pull image, using default image"
        );
        if let Err(e) = self.make_available(&fallback).await {
            tracing::error!(container_id, image = %fallback, error = %e, "Failed to pull default image");
            self.records.mark_failed(container_id, None).await?;
            return Err(ProvisionError::engine("pull", e));
        }
        self.records.set_image(container_id, &fallback).await?;
        Ok(fallback)
    }

    async fn make_available(&self, image: &str) -> Result<(), EngineError> {
        if self.engine.image_exists(image).await? {
            return Ok(());
        }
        tracing::info!(image, "Pulling image");
        self.engine.pull_image(image).await
    }

    fn build_spec(
        &self,
        name: &str,
        container_type: ContainerType,
        flow_id: i64,
        template: &ContainerTemplate,
        image: String,
        work_mount: MountSpec,
    ) -> ContainerSpec {
        let mut mounts = vec![work_mount];
        if self.topology.inside {
            mounts.push(MountSpec::Bind {
                source: self.topology.socket_path.clone(),
                target: CONTAINER_SOCKET_PATH.to_string(),
            });
        }

        let ports = match container_type {
            ContainerType::Primary => flow_ports(flow_id)
                .into_iter()
                .map(|port| PublishedPort {
                    port,
                    host_ip: self.topology.public_ip.clone(),
                })
                .collect(),
            ContainerType::Secondary => Vec::new(),
        };

        let cap_add = if self.topology.net_admin {
            NET_ADMIN_CAPS.iter().map(|c| c.to_string()).collect()
        } else {
            Vec::new()
        };

        let mut labels = template.labels.clone();
        labels.insert(LABEL_FLOW_ID.to_string(), flow_id.to_string());
        labels.insert(
            LABEL_CONTAINER_TYPE.to_string(),
            container_type.as_str().to_string(),
        );

        ContainerSpec {
            image,
            hostname: container_hostname(name),
            working_dir: CONTAINER_WORK_DIR.to_string(),
            env: template.env.clone(),
            entrypoint: template.entrypoint.clone(),
            cmd: template.cmd.clone(),
            labels,
            ports,
            mounts,
            network: self.topology.network.clone(),
            cap_add,
            log_rotation: LogRotation::default(),
            restart_policy: RESTART_POLICY.to_string(),
        }
    }
}

/// Stable hostname derived from the container name.
pub fn container_hostname(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    hex::encode(&digest[..4])
}

/// How the engine addresses the container of `record`: its engine id, or
/// its name before the id was recorded.
pub fn engine_ref(record: &Container) -> &str {
    if record.local_id.is_empty() {
        &record.name
    } else {
        &record.local_id
    }
}

/// Managed volume backing a flow's working directory when no host path resolves.
pub fn flow_volume_name(flow_id: i64) -> String {
    format!("flowbox-flow-{}-data", flow_id)
}
