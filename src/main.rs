use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "flowbox")]
#[command(version, about = "Ephemeral container provisioner for agent flows")]
pub struct Cli {
    /// Path to a flowbox.toml configuration file
    #[arg(long, global = true, env = "FLOWBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the SQLite record database (defaults to <data_dir>/flowbox.db)
    #[arg(long, global = true, env = "FLOWBOX_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the host ports reserved for a flow
    Ports {
        flow_id: i64,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve and print the socket and data directory topology
    Topology,
    /// Fail interrupted flows and remove containers of finished flows
    Cleanup {
        /// Maximum concurrent container deletions (unbounded when omitted)
        #[arg(long)]
        max_in_flight: Option<usize>,
        /// Only release the containers of this flow
        #[arg(long)]
        flow: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    flowbox::logging::init(cli.json_logs, cli.verbose);

    match &cli.command {
        Commands::Ports { flow_id, json } => cmd::cmd_ports(*flow_id, *json)?,
        Commands::Topology => cmd::cmd_topology(&cli).await?,
        Commands::Cleanup {
            max_in_flight,
            flow,
        } => cmd::cmd_cleanup(&cli, *max_in_flight, *flow).await?,
    }

    Ok(())
}
