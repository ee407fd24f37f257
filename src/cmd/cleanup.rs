//! Reconciliation pass: `flowbox cleanup`.

use anyhow::Result;
use std::sync::Arc;

use flowbox::Reconciler;

use super::super::Cli;
use super::{build_manager, load_config};

pub async fn cmd_cleanup(cli: &Cli, max_in_flight: Option<usize>, flow: Option<i64>) -> Result<()> {
    let config = load_config(cli)?;
    let manager = Arc::new(build_manager(cli, &config).await?);
    let reconciler =
        Reconciler::new(manager).with_max_in_flight(max_in_flight.or(config.cleanup_max_in_flight));

    let report = match flow {
        Some(flow_id) => reconciler.release_flow(flow_id).await?,
        None => reconciler.cleanup().await?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.failures.is_empty() {
        anyhow::bail!(
            "{} container(s) could not be deleted; rerun cleanup to retry",
            report.failures.len()
        );
    }
    Ok(())
}
