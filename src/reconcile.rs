//! Startup reconciliation of persisted flow/container state with reality.
//!
//! After an unclean shutdown, flows can be left `created` or claim to be
//! running while their containers never came up. Such flows are marked
//! `failed`; then every container still `starting`/`running` whose flow is
//! `finished` or `failed` is force-deleted, by name when the crash came
//! before its engine id was recorded. Containers of active flows are never
//! touched.
//!
//! Deletions fan out as one task per container. The startup pass is
//! unbounded; long-lived on-demand callers should set a limit with
//! [`Reconciler::with_max_in_flight`].

use std::collections::HashMap;
use std::sync::Arc;

use flowbox_common::{Container, ContainerStatus, Flow, FlowStatus};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::errors::ProvisionError;
use crate::lifecycle::LifecycleManager;

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Flows moved to `failed` by this pass.
    pub failed_flows: Vec<i64>,
    /// Container records deleted by this pass.
    pub deleted: Vec<i64>,
    /// Deletions that failed; left for the next pass.
    pub failures: Vec<DeletionFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionFailure {
    pub container_id: i64,
    pub flow_id: i64,
    pub error: String,
}

pub struct Reconciler {
    manager: Arc<LifecycleManager>,
    max_in_flight: Option<usize>,
}

impl Reconciler {
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self {
            manager,
            max_in_flight: None,
        }
    }

    /// Cap concurrent deletions. `None` (the default) is unbounded.
    pub fn with_max_in_flight(mut self, limit: Option<usize>) -> Self {
        self.max_in_flight = limit.filter(|n| *n > 0);
        self
    }

    /// Run a full reconciliation pass.
    ///
    /// Reading records and failing flows are fatal; individual container
    /// deletions are not.
    pub async fn cleanup(&self) -> Result<ReconcileReport, ProvisionError> {
        let records = self.manager.records();
        let flows = records.flows().await?;
        let containers = records.containers().await?;

        let mut by_flow: HashMap<i64, Vec<Container>> = HashMap::new();
        for container in containers {
            by_flow.entry(container.flow_id).or_default().push(container);
        }

        let mut report = ReconcileReport::default();
        let mut stale = Vec::new();
        for flow in flows {
            let flow_containers = by_flow.remove(&flow.id).unwrap_or_default();

            let mut status = flow.status;
            if needs_failure(&flow, &flow_containers) {
                tracing::warn!(flow_id = flow.id, status = %flow.status, "Marking interrupted flow as failed");
                status = records.mark_flow_failed(flow.id).await?.status;
                report.failed_flows.push(flow.id);
            }

            if status.is_done() {
                stale.extend(
                    flow_containers
                        .into_iter()
                        .filter(|c| c.status.is_active()),
                );
            }
        }

        let (deleted, failures) = self.delete_all(stale).await;
        report.deleted = deleted;
        report.failures = failures;

        tracing::info!(
            failed_flows = report.failed_flows.len(),
            deleted = report.deleted.len(),
            failures = report.failures.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Delete every `starting`/`running` container of one flow.
    pub async fn release_flow(&self, flow_id: i64) -> Result<ReconcileReport, ProvisionError> {
        let active: Vec<Container> = self
            .manager
            .records()
            .flow_containers(flow_id)
            .await?
            .into_iter()
            .filter(|c| c.status.is_active())
            .collect();

        let (deleted, failures) = self.delete_all(active).await;
        Ok(ReconcileReport {
            failed_flows: Vec::new(),
            deleted,
            failures,
        })
    }

    /// Delete containers concurrently, one task each. Failures are logged and
    /// collected, never propagated.
    async fn delete_all(&self, containers: Vec<Container>) -> (Vec<i64>, Vec<DeletionFailure>) {
        let limiter = self.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));

        let handles: Vec<_> = containers
            .iter()
            .map(|container| {
                let manager = self.manager.clone();
                let limiter = limiter.clone();
                let record = container.clone();
                tokio::spawn(async move {
                    let _permit = match &limiter {
                        Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
                        None => None,
                    };
                    manager.release(&record).await
                })
            })
            .collect();

        let results = join_all(handles).await;

        let mut deleted = Vec::new();
        let mut failures = Vec::new();
        for (container, result) in containers.iter().zip(results) {
            let error = match result {
                Ok(Ok(())) => {
                    deleted.push(container.id);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(join_err) => format!("deletion task panicked: {}", join_err),
            };
            tracing::error!(
                flow_id = container.flow_id,
                container_id = container.id,
                local_id = %container.local_id,
                error = %error,
                "Failed to delete container"
            );
            failures.push(DeletionFailure {
                container_id: container.id,
                flow_id: container.flow_id,
                error,
            });
        }
        (deleted, failures)
    }
}

/// Whether a flow can no longer be resumed and must be marked `failed`.
///
/// `created` flows never left provisioning. `running`/`waiting` flows need
/// at least one container and every container `running`.
pub fn needs_failure(flow: &Flow, containers: &[Container]) -> bool {
    match flow.status {
        FlowStatus::Created => true,
        FlowStatus::Running | FlowStatus::Waiting => {
            containers.is_empty()
                || containers
                    .iter()
                    .any(|c| c.status != ContainerStatus::Running)
        }
        FlowStatus::Finished | FlowStatus::Failed => false,
    }
}
