//! CLI command implementations

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Subcommand;
use statkeep_core::status::CountersSnapshot;

use crate::simulation::{SimulationOptions, run_simulation};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the supervised aggregator against simulated peer workers
    Simulate {
        /// Number of simulated transfers
        #[arg(short, long, default_value = "4")]
        transfers: usize,
        /// Simulated peers per transfer
        #[arg(short, long, default_value = "8")]
        peers: usize,
        /// How long the peers keep producing
        #[arg(short, long, default_value = "20")]
        duration_secs: u64,
        /// Drain period in milliseconds (defaults to STATKEEP_TICK_INTERVAL_MS or 5000)
        #[arg(long)]
        tick_ms: Option<u64>,
        /// Write the counters snapshot here on shutdown
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Continue counting from an existing snapshot
        #[arg(long, requires = "snapshot")]
        resume: bool,
        /// Seed for the simulated traffic
        #[arg(long)]
        seed: Option<u64>,
        /// Print updates as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Print a persisted counters snapshot
    Snapshot {
        /// Path to the snapshot file
        path: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Simulate {
            transfers,
            peers,
            duration_secs,
            tick_ms,
            snapshot,
            resume,
            seed,
            json,
        } => {
            if transfers == 0 || peers == 0 {
                bail!("--transfers and --peers must both be at least 1");
            }
            if tick_ms == Some(0) {
                bail!("--tick-ms must be at least 1");
            }

            let options = SimulationOptions {
                transfers,
                peers,
                duration: Duration::from_secs(duration_secs),
                tick_interval: tick_ms.map(Duration::from_millis),
                snapshot,
                resume,
                seed: seed.unwrap_or_else(rand::random),
                json,
            };
            run_simulation(options).await
        }
        Commands::Snapshot { path } => show_snapshot(path),
    }
}

/// Print a persisted counters snapshot
///
/// # Errors
/// - Snapshot file is missing, unreadable or malformed
pub fn show_snapshot(path: PathBuf) -> anyhow::Result<()> {
    let snapshot = CountersSnapshot::read_from(&path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?
        .with_context(|| format!("No snapshot at {}", path.display()))?;

    println!("Snapshot: {}", path.display());
    println!("  Uploaded:   {} bytes", snapshot.uploaded);
    println!("  Downloaded: {} bytes", snapshot.downloaded);
    println!("  Version:    {}", snapshot.version);

    Ok(())
}
