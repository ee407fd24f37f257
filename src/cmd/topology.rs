//! Topology inspection: `flowbox topology`.

use anyhow::Result;
use flowbox::Topology;
use flowbox::topology::self_inspector;

use super::super::Cli;
use super::{connect_engine, load_config};

pub async fn cmd_topology(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let engine = connect_engine().await?;
    let inspector = self_inspector(&config, engine.clone());
    let topology = Topology::resolve(&config, engine.as_ref(), inspector.as_ref()).await;

    println!("{}", serde_json::to_string_pretty(&topology)?);
    Ok(())
}
