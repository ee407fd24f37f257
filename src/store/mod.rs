//! Persistence seam for flow and container records.
//!
//! [`RecordStore`] is the narrow query interface the provisioner consumes;
//! the persistence layer owns the rows. [`Records`] wraps a store, naming each
//! status transition and converting failures into
//! [`ProvisionError::Persistence`].

pub mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use flowbox_common::{Container, ContainerStatus, Flow, FlowStatus, NewContainer};

use crate::errors::ProvisionError;

pub use sqlite::SqliteStore;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_container(&self, new: NewContainer) -> Result<Container>;

    async fn update_container_status(&self, id: i64, status: ContainerStatus)
    -> Result<Container>;

    async fn update_container_status_local_id(
        &self,
        id: i64,
        status: ContainerStatus,
        local_id: &str,
    ) -> Result<Container>;

    async fn update_container_image(&self, id: i64, image: &str) -> Result<Container>;

    async fn get_container(&self, id: i64) -> Result<Option<Container>>;

    async fn list_containers(&self) -> Result<Vec<Container>>;

    async fn list_flow_containers(&self, flow_id: i64) -> Result<Vec<Container>>;

    async fn get_flow(&self, id: i64) -> Result<Option<Flow>>;

    async fn list_flows(&self) -> Result<Vec<Flow>>;

    async fn update_flow_status(&self, id: i64, status: FlowStatus) -> Result<Flow>;
}

/// Record store adapter used by the lifecycle manager and the reconciler.
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn RecordStore>,
}

impl Records {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn create_container(&self, new: NewContainer) -> Result<Container, ProvisionError> {
        self.store
            .create_container(new)
            .await
            .map_err(|e| ProvisionError::persistence("create_container", e))
    }

    pub async fn set_image(&self, id: i64, image: &str) -> Result<Container, ProvisionError> {
        self.store
            .update_container_image(id, image)
            .await
            .map_err(|e| ProvisionError::persistence("update_container_image", e))
    }

    /// Record the engine id as soon as the engine created the container.
    pub async fn mark_created(&self, id: i64, local_id: &str) -> Result<Container, ProvisionError> {
        self.set_status_local_id(id, ContainerStatus::Starting, local_id)
            .await
    }

    pub async fn mark_running(&self, id: i64, local_id: &str) -> Result<Container, ProvisionError> {
        self.set_status_local_id(id, ContainerStatus::Running, local_id)
            .await
    }

    /// Record a failed spawn, keeping the engine id when the engine already
    /// created the container.
    pub async fn mark_failed(
        &self,
        id: i64,
        local_id: Option<&str>,
    ) -> Result<Container, ProvisionError> {
        match local_id {
            Some(local_id) => {
                self.set_status_local_id(id, ContainerStatus::Failed, local_id)
                    .await
            }
            None => self.set_status(id, ContainerStatus::Failed).await,
        }
    }

    pub async fn mark_stopped(&self, id: i64) -> Result<Container, ProvisionError> {
        self.set_status(id, ContainerStatus::Stopped).await
    }

    pub async fn mark_deleted(&self, id: i64) -> Result<Container, ProvisionError> {
        self.set_status(id, ContainerStatus::Deleted).await
    }

    pub async fn containers(&self) -> Result<Vec<Container>, ProvisionError> {
        self.store
            .list_containers()
            .await
            .map_err(|e| ProvisionError::persistence("list_containers", e))
    }

    pub async fn flow_containers(&self, flow_id: i64) -> Result<Vec<Container>, ProvisionError> {
        self.store
            .list_flow_containers(flow_id)
            .await
            .map_err(|e| ProvisionError::persistence("list_flow_containers", e))
    }

    pub async fn flows(&self) -> Result<Vec<Flow>, ProvisionError> {
        self.store
            .list_flows()
            .await
            .map_err(|e| ProvisionError::persistence("list_flows", e))
    }

    pub async fn mark_flow_failed(&self, id: i64) -> Result<Flow, ProvisionError> {
        self.store
            .update_flow_status(id, FlowStatus::Failed)
            .await
            .map_err(|e| ProvisionError::persistence("update_flow_status", e))
    }

    async fn set_status(
        &self,
        id: i64,
        status: ContainerStatus,
    ) -> Result<Container, ProvisionError> {
        let container = self
            .store
            .update_container_status(id, status)
            .await
            .map_err(|e| ProvisionError::persistence("update_container_status", e))?;
        tracing::debug!(container_id = id, status = %status, "Container status updated");
        Ok(container)
    }

    async fn set_status_local_id(
        &self,
        id: i64,
        status: ContainerStatus,
        local_id: &str,
    ) -> Result<Container, ProvisionError> {
        let container = self
            .store
            .update_container_status_local_id(id, status, local_id)
            .await
            .map_err(|e| ProvisionError::persistence("update_container_status_local_id", e))?;
        tracing::debug!(container_id = id, status = %status, local_id, "Container status updated");
        Ok(container)
    }
}
