use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Created,
    Running,
    Waiting,
    Finished,
    Failed,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Whether the flow is doing (or waiting to do) work.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Waiting)
    }

    /// Whether the flow has ended; its containers are safe to remove.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl FromStr for FlowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid flow status: {}", s)),
        }
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flow {
    pub id: i64,
    pub status: FlowStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    /// Terminal and file operations for the flow. Publishes the flow's ports.
    Primary,
    Secondary,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl FromStr for ContainerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            _ => Err(format!("Invalid container type: {}", s)),
        }
    }
}

impl std::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted container status.
///
/// Advances `Starting -> Running -> Stopped -> Deleted`; `Failed` is reachable
/// from `Starting` or `Running`. `Deleted` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Starting,
    Running,
    Stopped,
    Deleted,
    Failed,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }

    /// Whether the engine may still hold a live container for this record.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl FromStr for ContainerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "deleted" => Ok(Self::Deleted),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid container status: {}", s)),
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Container {
    pub id: i64,
    pub container_type: ContainerType,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    /// Engine-assigned identifier; empty until the engine has created it.
    pub local_id: String,
    /// Host-side bind directory; empty when backed by a managed volume.
    pub local_dir: String,
    pub flow_id: i64,
}

/// Fields supplied when a container record is first persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContainer {
    pub container_type: ContainerType,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub local_id: String,
    pub local_dir: String,
    pub flow_id: i64,
}
