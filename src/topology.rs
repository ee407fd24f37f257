//! Orchestrator topology: where the daemon socket and data directory live
//! from the engine host's point of view.
//!
//! Resolved once when the provisioner is built and never mutated afterwards;
//! share it freely between concurrent lifecycle calls.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ProvisionerConfig;
use crate::engine::ContainerEngine;
use crate::hostpath::{
    ContainerIdLookup, HostnameMatch, SelfInspector, resolve_host_data_dir, resolve_socket_path,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub inside: bool,
    pub net_admin: bool,
    /// Host-side path of the daemon socket.
    pub socket_path: String,
    /// Data directory as seen by this process.
    pub data_dir: PathBuf,
    /// Host-side path backing `data_dir`; `None` selects managed volumes.
    pub host_data_dir: Option<PathBuf>,
    pub network: Option<String>,
    pub public_ip: String,
    pub default_image: String,
}

impl Topology {
    /// Resolve socket and data directory paths by introspection.
    pub async fn resolve(
        config: &ProvisionerConfig,
        engine: &dyn ContainerEngine,
        inspector: &dyn SelfInspector,
    ) -> Self {
        let data_dir =
            std::path::absolute(&config.data_dir).unwrap_or_else(|_| config.data_dir.clone());

        let socket_path = resolve_socket_path(
            config.docker_socket.as_deref(),
            &engine.daemon_endpoint(),
            inspector,
        )
        .await;
        let host_data_dir =
            resolve_host_data_dir(config.work_dir.as_deref(), &data_dir, inspector).await;

        match &host_data_dir {
            Some(dir) => tracing::info!(
                socket = %socket_path,
                host_data_dir = %dir.display(),
                "Resolved orchestrator topology"
            ),
            None => tracing::info!(
                socket = %socket_path,
                "Resolved orchestrator topology, flows will use managed volumes"
            ),
        }

        Self {
            inside: config.inside,
            net_admin: config.net_admin,
            socket_path,
            data_dir,
            host_data_dir,
            network: config.network.clone(),
            public_ip: config.public_ip.clone(),
            default_image: config.default_image.clone(),
        }
    }

    /// Per-flow working directory as seen by this process.
    pub fn flow_dir(&self, flow_id: i64) -> PathBuf {
        self.data_dir.join(flow_dir_name(flow_id))
    }

    /// Per-flow working directory as seen by the engine host.
    pub fn host_flow_dir(&self, flow_id: i64) -> Option<PathBuf> {
        self.host_data_dir
            .as_deref()
            .map(|dir| dir.join(flow_dir_name(flow_id)))
    }
}

/// Directory name for a flow under the data directory.
pub fn flow_dir_name(flow_id: i64) -> String {
    format!("flow-{}", flow_id)
}

/// Pick the self-identification strategy for this configuration.
pub fn self_inspector(
    config: &ProvisionerConfig,
    engine: Arc<dyn ContainerEngine>,
) -> Box<dyn SelfInspector> {
    match &config.self_container_id {
        Some(id) => Box::new(ContainerIdLookup::new(engine, id.clone())),
        None => match HostnameMatch::local(engine.clone()) {
            Ok(inspector) => Box::new(inspector),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read local hostname, self-identification disabled");
                Box::new(HostnameMatch::new(engine, ""))
            }
        },
    }
}
