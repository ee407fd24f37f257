//! Ephemeral container provisioning for agent flows.
//!
//! A flow gets a deterministic pair of host ports, a working directory
//! shared with its containers, and containers whose lifecycle is mirrored
//! into a record store. [`reconcile::Reconciler`] repairs that store after
//! an unclean shutdown.

pub mod config;
pub mod engine;
pub mod errors;
pub mod hostpath;
pub mod lifecycle;
pub mod logging;
pub mod reconcile;
pub mod store;
pub mod topology;

pub use config::ProvisionerConfig;
pub use errors::{EngineError, ProvisionError};
pub use flowbox_common::{
    Container, ContainerStatus, ContainerType, Flow, FlowStatus, NewContainer, flow_ports,
};
pub use lifecycle::{ContainerTemplate, LifecycleManager};
pub use reconcile::{DeletionFailure, ReconcileReport, Reconciler};
pub use store::{RecordStore, Records, SqliteStore};
pub use topology::Topology;
