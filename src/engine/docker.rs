//! Docker implementation of [`ContainerEngine`] on top of `bollard`.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, HostConfig, HostConfigLogConfig, MountPointTypeEnum, PortBinding,
    RestartPolicy, RestartPolicyNameEnum, VolumeCreateRequest,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use futures::TryStreamExt;

use super::{ContainerEngine, ContainerInfo, ContainerSpec, MountInfo, MountKind, MountSpec, Outcome};
use crate::errors::EngineError;

/// Default daemon endpoint when `DOCKER_HOST` is not set.
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Grace period given to a container before the daemon kills it.
const STOP_TIMEOUT_SECS: i32 = 10;

/// Container engine backed by a Docker daemon.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
    endpoint: String,
}

impl DockerEngine {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket).
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        let endpoint =
            std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_DOCKER_HOST.to_string());
        Ok(Self { docker, endpoint })
    }

    /// Round-trip to the daemon so misconfiguration surfaces at startup.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, &self.endpoint))
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn daemon_endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        match self.docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(e) => match map_error(e, reference) {
                EngineError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let (from_image, tag) = split_reference(reference);
        self.docker
            .create_image(
                Some(
                    CreateImageOptionsBuilder::new()
                        .from_image(from_image)
                        .tag(tag)
                        .build(),
                ),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, reference))
    }

    async fn create_volume(&self, name: &str) -> Result<String, EngineError> {
        let volume = self
            .docker
            .create_volume(VolumeCreateRequest {
                name: Some(name.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| map_error(e, name))?;
        Ok(volume.name)
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<String, EngineError> {
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(name).build()),
                build_create_body(spec),
            )
            .await
            .map_err(|e| map_error(e, name))?;
        for warning in &response.warnings {
            tracing::warn!(container = name, warning = %warning, "Engine warning on create");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| map_error(e, id))
    }

    async fn stop_container(&self, id: &str) -> Result<Outcome, EngineError> {
        match self
            .docker
            .stop_container(
                id,
                Some(StopContainerOptionsBuilder::new().t(STOP_TIMEOUT_SECS).build()),
            )
            .await
        {
            Ok(()) => Ok(Outcome::Done),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(Outcome::Done),
            Err(e) => match map_error(e, id) {
                EngineError::NotFound(_) => Ok(Outcome::NotFound),
                other => Err(other),
            },
        }
    }

    async fn remove_container(&self, id: &str) -> Result<Outcome, EngineError> {
        match self
            .docker
            .remove_container(
                id,
                Some(
                    RemoveContainerOptionsBuilder::new()
                        .force(true)
                        .v(true)
                        .build(),
                ),
            )
            .await
        {
            Ok(()) => Ok(Outcome::Done),
            Err(e) => match map_error(e, id) {
                EngineError::NotFound(_) => Ok(Outcome::NotFound),
                other => Err(other),
            },
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, EngineError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(e, id))?;

        let mounts = inspect
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| MountInfo {
                kind: match m.typ {
                    Some(MountPointTypeEnum::BIND) => MountKind::Bind,
                    Some(MountPointTypeEnum::VOLUME) => MountKind::Volume,
                    _ => MountKind::Other,
                },
                source: m.source.unwrap_or_default(),
                destination: m.destination.unwrap_or_default(),
            })
            .collect();

        Ok(ContainerInfo {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            hostname: inspect
                .config
                .and_then(|c| c.hostname)
                .unwrap_or_default(),
            running: inspect.state.and_then(|s| s.running).unwrap_or(false),
            mounts,
        })
    }

    async fn list_running(&self) -> Result<Vec<String>, EngineError> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptionsBuilder::new().all(false).build()))
            .await
            .map_err(|e| map_error(e, &self.endpoint))?;
        Ok(summaries.into_iter().filter_map(|s| s.id).collect())
    }
}

/// Translate a [`ContainerSpec`] into the Docker create body.
fn build_create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let mut exposed_ports = Vec::with_capacity(spec.ports.len());
    let mut port_bindings = HashMap::new();
    for published in &spec.ports {
        let key = format!("{}/tcp", published.port);
        exposed_ports.push(key.clone());
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: Some(published.host_ip.clone()),
                host_port: Some(published.port.to_string()),
            }]),
        );
    }

    let binds: Vec<String> = spec
        .mounts
        .iter()
        .map(|mount| match mount {
            MountSpec::Bind { source, target } => format!("{}:{}", source, target),
            MountSpec::Volume { name, target } => format!("{}:{}", name, target),
        })
        .collect();

    let log_config = HostConfigLogConfig {
        typ: Some("json-file".to_string()),
        config: Some(HashMap::from([
            ("max-size".to_string(), spec.log_rotation.max_size.clone()),
            ("max-file".to_string(), spec.log_rotation.max_file.to_string()),
        ])),
    };

    let host_config = HostConfig {
        binds: if binds.is_empty() { None } else { Some(binds) },
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        restart_policy: Some(RestartPolicy {
            name: Some(restart_policy_name(&spec.restart_policy)),
            maximum_retry_count: None,
        }),
        log_config: Some(log_config),
        cap_add: if spec.cap_add.is_empty() {
            None
        } else {
            Some(spec.cap_add.clone())
        },
        network_mode: spec.network.clone(),
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        hostname: Some(spec.hostname.clone()),
        working_dir: Some(spec.working_dir.clone()),
        env: if spec.env.is_empty() {
            None
        } else {
            Some(spec.env.clone())
        },
        entrypoint: spec.entrypoint.clone(),
        cmd: spec.cmd.clone(),
        labels: if spec.labels.is_empty() {
            None
        } else {
            Some(spec.labels.clone())
        },
        exposed_ports: if exposed_ports.is_empty() {
            None
        } else {
            Some(exposed_ports)
        },
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn restart_policy_name(name: &str) -> RestartPolicyNameEnum {
    match name {
        "no" => RestartPolicyNameEnum::NO,
        "always" => RestartPolicyNameEnum::ALWAYS,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        _ => RestartPolicyNameEnum::UNLESS_STOPPED,
    }
}

/// Split `repo[:tag]` into repository and tag, defaulting the tag to `latest`.
///
/// A colon followed by a `/` belongs to a registry port, not a tag.
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}

fn map_error(err: BollardError, subject: &str) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound(subject.to_string()),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Daemon {
            status: status_code,
            message,
        },
        BollardError::IOError { .. }
        | BollardError::SocketNotFoundError(_)
        | BollardError::RequestTimeoutError => EngineError::Connection(err.to_string()),
        other => EngineError::Other(other.to_string()),
    }
}
