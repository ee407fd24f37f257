//! Startup reconciliation against a fake engine and in-memory SQLite.

mod common;

use common::{DEFAULT_IMAGE, Harness};
use flowbox::store::RecordStore;
use flowbox::{
    Container, ContainerStatus, ContainerTemplate, ContainerType, FlowStatus, NewContainer,
    Reconciler,
};

async fn spawn(h: &Harness, flow_id: i64, name: &str) -> Container {
    h.manager
        .spawn(
            name,
            ContainerType::Primary,
            flow_id,
            Some(&ContainerTemplate::new(DEFAULT_IMAGE)),
        )
        .await
        .unwrap()
}

/// Insert a record that claims the given status without touching the engine.
async fn insert_record(h: &Harness, flow_id: i64, status: ContainerStatus, local_id: &str) -> Container {
    h.store
        .create_container(NewContainer {
            container_type: ContainerType::Primary,
            name: format!("stale-{}", flow_id),
            image: DEFAULT_IMAGE.to_string(),
            status,
            local_id: local_id.to_string(),
            local_dir: String::new(),
            flow_id,
        })
        .await
        .unwrap()
}

async fn flow_status(h: &Harness, id: i64) -> FlowStatus {
    h.store.get_flow(id).await.unwrap().unwrap().status
}

async fn container_status(h: &Harness, id: i64) -> ContainerStatus {
    h.store.get_container(id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_created_flow_without_containers_is_failed() {
    let h = Harness::new();
    let flow = h.store.create_flow(FlowStatus::Created).await.unwrap();

    let report = Reconciler::new(h.manager.clone()).cleanup().await.unwrap();

    assert_eq!(report.failed_flows, vec![flow.id]);
    assert!(report.deleted.is_empty());
    assert!(report.failures.is_empty());
    assert_eq!(flow_status(&h, flow.id).await, FlowStatus::Failed);
}

#[tokio::test]
async fn test_healthy_running_flow_is_untouched() {
    let h = Harness::new();
    let flow = h.store.create_flow(FlowStatus::Running).await.unwrap();
    let container = spawn(&h, flow.id, "worker").await;

    let report = Reconciler::new(h.manager.clone()).cleanup().await.unwrap();

    assert!(report.failed_flows.is_empty());
    assert!(report.deleted.is_empty());
    assert_eq!(flow_status(&h, flow.id).await, FlowStatus::Running);
    assert_eq!(container_status(&h, container.id).await, ContainerStatus::Running);
    assert!(h.engine.container(&container.local_id).unwrap().running);
}

#[tokio::test]
async fn test_finished_flow_containers_are_deleted() {
    let h = Harness::new();
    let flow = h.store.create_flow(FlowStatus::Running).await.unwrap();
    let container = spawn(&h, flow.id, "worker").await;
    h.store
        .update_flow_status(flow.id, FlowStatus::Finished)
        .await
        .unwrap();

    let report = Reconciler::new(h.manager.clone()).cleanup().await.unwrap();

    assert!(report.failed_flows.is_empty());
    assert_eq!(report.deleted, vec![container.id]);
    assert_eq!(flow_status(&h, flow.id).await, FlowStatus::Finished);
    assert_eq!(container_status(&h, container.id).await, ContainerStatus::Deleted);
    assert_eq!(h.engine.removed(), vec![container.local_id]);
}

#[tokio::test]
async fn test_running_flow_with_starting_container_is_failed_and_cleaned() {
    let h = Harness::new();
    let flow = h.store.create_flow(FlowStatus::Running).await.unwrap();
    let healthy = spawn(&h, flow.id, "worker").await;
    let stuck = insert_record(&h, flow.id, ContainerStatus::Starting, "").await;

    let report = Reconciler::new(h.manager.clone()).cleanup().await.unwrap();

    assert_eq!(report.failed_flows, vec![flow.id]);
    let mut deleted = report.deleted.clone();
    deleted.sort();
    assert_eq!(deleted, vec![healthy.id, stuck.id]);
    assert_eq!(flow_status(&h, flow.id).await, FlowStatus::Failed);
    assert_eq!(container_status(&h, healthy.id).await, ContainerStatus::Deleted);
    assert_eq!(container_status(&h, stuck.id).await, ContainerStatus::Deleted);
}

#[tokio::test]
async fn test_container_created_before_id_was_recorded_is_removed() {
    let h = Harness::new();
    let flow = h.store.create_flow(FlowStatus::Running).await.unwrap();
    let engine_id = h.engine.add_running("flowbox-terminal-1");
    let record = h
        .store
        .create_container(NewContainer {
            container_type: ContainerType::Primary,
            name: "flowbox-terminal-1".to_string(),
            image: DEFAULT_IMAGE.to_string(),
            status: ContainerStatus::Starting,
            local_id: String::new(),
            local_dir: String::new(),
            flow_id: flow.id,
        })
        .await
        .unwrap();

    let report = Reconciler::new(h.manager.clone()).cleanup().await.unwrap();

    assert_eq!(report.failed_flows, vec![flow.id]);
    assert_eq!(report.deleted, vec![record.id]);
    assert_eq!(container_status(&h, record.id).await, ContainerStatus::Deleted);
    assert_eq!(h.engine.removed(), vec![engine_id]);
    assert!(!h.engine.has_container_named("flowbox-terminal-1"));

    // The name is free again for the next spawn.
    let retry = h.store.create_flow(FlowStatus::Running).await.unwrap();
    spawn(&h, retry.id, "flowbox-terminal-1").await;
}

#[tokio::test]
async fn test_waiting_flow_without_containers_is_failed() {
    let h = Harness::new();
    let flow = h.store.create_flow(FlowStatus::Waiting).await.unwrap();

    let report = Reconciler::new(h.manager.clone()).cleanup().await.unwrap();

    assert_eq!(report.failed_flows, vec![flow.id]);
    assert_eq!(flow_status(&h, flow.id).await, FlowStatus::Failed);
}

#[tokio::test]
async fn test_terminal_container_records_are_skipped() {
    let h = Harness::new();
    let flow = h.store.create_flow(FlowStatus::Failed).await.unwrap();
    let stopped = insert_record(&h, flow.id, ContainerStatus::Stopped, "gone").await;
    let failed = insert_record(&h, flow.id, ContainerStatus::Failed, "").await;

    let report = Reconciler::new(h.manager.clone()).cleanup().await.unwrap();

    assert!(report.deleted.is_empty());
    assert_eq!(container_status(&h, stopped.id).await, ContainerStatus::Stopped);
    assert_eq!(container_status(&h, failed.id).await, ContainerStatus::Failed);
}

#[tokio::test]
async fn test_deletion_failures_are_reported_not_fatal() {
    let h = Harness::new();
    let flow = h.store.create_flow(FlowStatus::Running).await.unwrap();
    let ok = spawn(&h, flow.id, "worker-a").await;
    let stubborn = spawn(&h, flow.id, "worker-b").await;
    h.store
        .update_flow_status(flow.id, FlowStatus::Finished)
        .await
        .unwrap();
    h.engine
        .with_state(|s| {
            s.fail_remove.insert(stubborn.local_id.clone());
        });

    let report = Reconciler::new(h.manager.clone())
        .with_max_in_flight(Some(1))
        .cleanup()
        .await
        .unwrap();

    assert_eq!(report.deleted, vec![ok.id]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].container_id, stubborn.id);
    assert_eq!(report.failures[0].flow_id, flow.id);
    assert!(report.failures[0].error.contains("removal already in progress"));
    assert_eq!(container_status(&h, ok.id).await, ContainerStatus::Deleted);
    assert_ne!(container_status(&h, stubborn.id).await, ContainerStatus::Deleted);
}

#[tokio::test]
async fn test_bounded_cleanup_deletes_everything() {
    let h = Harness::new();
    let flow = h.store.create_flow(FlowStatus::Running).await.unwrap();
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(spawn(&h, flow.id, &format!("worker-{}", i)).await.id);
    }
    h.store
        .update_flow_status(flow.id, FlowStatus::Finished)
        .await
        .unwrap();

    let report = Reconciler::new(h.manager.clone())
        .with_max_in_flight(Some(2))
        .cleanup()
        .await
        .unwrap();

    let mut deleted = report.deleted;
    deleted.sort();
    assert_eq!(deleted, ids);
    assert!(h.engine.state.lock().unwrap().containers.is_empty());
}

#[tokio::test]
async fn test_release_flow_only_touches_that_flow() {
    let h = Harness::new();
    let target = h.store.create_flow(FlowStatus::Running).await.unwrap();
    let other = h.store.create_flow(FlowStatus::Running).await.unwrap();
    let released = spawn(&h, target.id, "target").await;
    let kept = spawn(&h, other.id, "other").await;

    let report = Reconciler::new(h.manager.clone())
        .release_flow(target.id)
        .await
        .unwrap();

    assert_eq!(report.deleted, vec![released.id]);
    assert!(report.failed_flows.is_empty());
    assert_eq!(container_status(&h, released.id).await, ContainerStatus::Deleted);
    assert_eq!(container_status(&h, kept.id).await, ContainerStatus::Running);
    assert_eq!(flow_status(&h, target.id).await, FlowStatus::Running);
}
