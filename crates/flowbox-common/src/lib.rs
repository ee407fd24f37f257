//! Shared domain types for the flowbox provisioner.
//!
//! `model` holds the persisted flow and container records, `ports` the
//! deterministic per-flow port allocator.

pub mod model;
pub mod ports;

pub use model::{Container, ContainerStatus, ContainerType, Flow, FlowStatus, NewContainer};
pub use ports::{BASE_PORT, PORT_WINDOW, PORTS_PER_FLOW, flow_ports};
