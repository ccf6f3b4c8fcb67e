//! Statkeep CLI - Command-line interface
//!
//! Runs the status aggregator against simulated peer workers and inspects
//! persisted counter snapshots.

mod commands;
mod simulation;

use std::path::PathBuf;

use clap::Parser;
use statkeep_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "statkeep")]
#[command(about = "Per-transfer status aggregation for a BitTorrent client")]
struct Cli {
    /// Console log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,
    /// Directory for the full trace log of the last run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|error| anyhow::anyhow!("Failed to initialize logging: {error}"))?;

    commands::handle_command(cli.command).await
}
