//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `ports`    | `Ports`          |
//! | `topology` | `Topology`       |
//! | `cleanup`  | `Cleanup`        |

pub mod cleanup;
pub mod ports;
pub mod topology;

pub use cleanup::cmd_cleanup;
pub use ports::cmd_ports;
pub use topology::cmd_topology;

use anyhow::{Context, Result};
use std::sync::Arc;

use flowbox::engine::{ContainerEngine, DockerEngine};
use flowbox::{LifecycleManager, ProvisionerConfig, SqliteStore};

use super::Cli;

const DB_FILE: &str = "flowbox.db";

pub(crate) fn load_config(cli: &Cli) -> Result<ProvisionerConfig> {
    ProvisionerConfig::load(cli.config.as_deref())
}

pub(crate) async fn connect_engine() -> Result<Arc<dyn ContainerEngine>> {
    let engine = DockerEngine::connect().context("Failed to connect to the Docker daemon")?;
    engine
        .ping()
        .await
        .context("Docker daemon did not answer ping")?;
    let engine: Arc<dyn ContainerEngine> = Arc::new(engine);
    Ok(engine)
}

pub(crate) async fn build_manager(cli: &Cli, config: &ProvisionerConfig) -> Result<LifecycleManager> {
    let db_path = match &cli.db_path {
        Some(path) => path.clone(),
        None => config.data_dir.join(DB_FILE),
    };
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open record database {}", db_path.display()))?;
    let engine = connect_engine().await?;
    Ok(LifecycleManager::connect(config, engine, Arc::new(store)).await)
}
