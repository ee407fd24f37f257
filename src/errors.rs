//! Typed error hierarchy for the provisioner.
//!
//! - `EngineError`: failures reported by a container engine client
//! - `ProvisionError`: failures of lifecycle and reconciliation operations

use thiserror::Error;

/// Errors from the container engine, independent of any engine client.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No such object: {0}")]
    NotFound(String),

    #[error("Engine daemon returned {status}: {message}")]
    Daemon { status: u16, message: String },

    #[error("Cannot reach engine daemon: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors from lifecycle and reconciliation operations.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Missing or invalid container configuration. Raised before any side effect.
    #[error("Invalid container configuration: {0}")]
    Configuration(String),

    #[error("Failed to prepare flow directory {path}: {source}")]
    Workspace {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine {op} failed: {source}")]
    Engine {
        op: &'static str,
        #[source]
        source: EngineError,
    },

    /// The system of record may now disagree with the engine.
    #[error("Persistence {op} failed: {source:#}")]
    Persistence {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ProvisionError {
    pub fn engine(op: &'static str, source: EngineError) -> Self {
        Self::Engine { op, source }
    }

    pub fn persistence(op: &'static str, source: anyhow::Error) -> Self {
        Self::Persistence { op, source }
    }
}
