//! Simulated peer workers feeding a supervised status aggregator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::bail;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use statkeep_core::status::{StatsUpdate, TrackerSignal, TransferStatus};
use statkeep_core::{DeltaBuffer, InfoHash, StatusConfig, StatusHandle, Supervisor};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

/// Length of every simulated piece.
const PIECE_SIZE: u64 = 16 * 1024;

/// Parameters of one simulation run.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub transfers: usize,
    pub peers: usize,
    pub duration: Duration,
    pub tick_interval: Option<Duration>,
    pub snapshot: Option<PathBuf>,
    pub resume: bool,
    pub seed: u64,
    pub json: bool,
}

/// Piece bookkeeping shared by every peer of one transfer.
struct SimulatedTransfer {
    info_hash: InfoHash,
    pieces: u32,
    claimed: AtomicU32,
    reported: AtomicU32,
}

impl SimulatedTransfer {
    fn new(name: &str, pieces: u32) -> Self {
        Self {
            info_hash: InfoHash::digest(name),
            pieces,
            claimed: AtomicU32::new(0),
            reported: AtomicU32::new(0),
        }
    }

    fn size(&self) -> u64 {
        u64::from(self.pieces) * PIECE_SIZE
    }

    /// Claims the next piece to download, if any remain.
    fn claim_piece(&self) -> bool {
        self.claimed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |claimed| {
                (claimed < self.pieces).then_some(claimed + 1)
            })
            .is_ok()
    }

    /// Counts a piece already reported to the aggregator.
    ///
    /// Returns true for the report that finishes the transfer. Every other
    /// piece report was sent before this one, so the aggregator sees `left`
    /// reach zero before the completion.
    fn report_piece(&self) -> bool {
        self.reported.fetch_add(1, Ordering::AcqRel) + 1 == self.pieces
    }
}

#[derive(Serialize)]
struct TransferRow<'a> {
    name: &'a str,
    info_hash: InfoHash,
    #[serde(flatten)]
    status: TransferStatus,
}

#[derive(Serialize)]
struct UpdateReport<'a> {
    #[serde(flatten)]
    update: StatsUpdate,
    statuses: Vec<TransferRow<'a>>,
}

/// Runs the aggregator under its supervisor with simulated peer traffic.
///
/// # Errors
/// - Counters could not be resumed from the snapshot
/// - The aggregator failed and its restart budget ran out
pub async fn run_simulation(options: SimulationOptions) -> anyhow::Result<()> {
    let mut config = StatusConfig::from_env();
    if let Some(tick_interval) = options.tick_interval {
        config.aggregator.tick_interval = tick_interval;
    }
    if let Some(path) = &options.snapshot {
        config = config.with_snapshot_path(path);
        config.persistence.resume_from_snapshot |= options.resume;
    }

    tracing::info!(
        transfers = options.transfers,
        peers = options.peers,
        seed = options.seed,
        tick_interval = ?config.aggregator.tick_interval,
        "Starting simulation"
    );

    let buffer = DeltaBuffer::new();
    let supervisor = Supervisor::spawn(config, buffer.clone())?;
    let mut rng = StdRng::seed_from_u64(options.seed);

    let (notifier, signals) = mpsc::unbounded_channel();
    let mut names = HashMap::new();
    let mut transfers = Vec::with_capacity(options.transfers);
    for index in 0..options.transfers {
        let name = format!("statkeep-sim-{index:03}");
        let transfer = Arc::new(SimulatedTransfer::new(&name, rng.random_range(16..=64)));
        supervisor
            .handle()
            .insert_transfer(transfer.info_hash, transfer.size(), notifier.clone())?;
        names.insert(transfer.info_hash, name);
        transfers.push(transfer);
    }
    // Only the aggregator's entries keep the channel open from here
    drop(notifier);

    let names = Arc::new(names);
    let tracker = tokio::spawn(run_tracker(signals, names.clone()));

    let deadline = Instant::now() + options.duration;
    let peers: Vec<_> = transfers
        .iter()
        .flat_map(|transfer| std::iter::repeat_n(transfer, options.peers))
        .map(|transfer| {
            tokio::spawn(run_peer(
                transfer.clone(),
                buffer.clone(),
                supervisor.watch_handle(),
                deadline,
                StdRng::seed_from_u64(rng.random()),
            ))
        })
        .collect();

    report_until(&supervisor, deadline, &names, options.json).await?;

    for result in join_all(peers).await {
        if let Err(error) = result {
            tracing::warn!(%error, "Simulated peer task failed");
        }
    }

    let handle = supervisor.handle();
    let final_update = StatsUpdate {
        tick: 0,
        drained: 0,
        transfers: names.len(),
    };
    print_update(&handle, final_update, &names, options.json).await?;

    let counters = supervisor.counters().clone();
    supervisor.shutdown().await?;
    let completed = tracker.await?;

    println!(
        "Simulation finished: {completed}/{} transfers completed, {} bytes uploaded, {} bytes downloaded",
        names.len(),
        counters.uploaded(),
        counters.downloaded()
    );
    if let Some(path) = options.snapshot {
        println!("Counters snapshot written to {}", path.display());
    }

    Ok(())
}

/// Prints the transfer table on every stats update until the deadline.
async fn report_until(
    supervisor: &Supervisor,
    deadline: Instant,
    names: &HashMap<InfoHash, String>,
    json: bool,
) -> anyhow::Result<()> {
    let mut handles = supervisor.watch_handle();
    let mut handle = handles.borrow_and_update().clone();
    let mut updates = handle.subscribe_stats().await?;

    let finished = tokio::time::sleep_until(deadline);
    tokio::pin!(finished);

    loop {
        tokio::select! {
            _ = &mut finished => return Ok(()),
            update = updates.recv() => match update {
                Ok(update) => print_update(&handle, update, names, json).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Reporter fell behind stats updates");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Aggregator stopped; follow its replacement if there is one
                    if handles.changed().await.is_err() {
                        bail!("Status aggregator stopped and was not restarted");
                    }
                    handle = handles.borrow_and_update().clone();
                    updates = handle.subscribe_stats().await?;
                }
            }
        }
    }
}

async fn print_update(
    handle: &StatusHandle,
    update: StatsUpdate,
    names: &HashMap<InfoHash, String>,
    json: bool,
) -> anyhow::Result<()> {
    let all = handle.all_transfers().await?;
    let mut rows: Vec<_> = all
        .into_iter()
        .map(|(info_hash, status)| TransferRow {
            name: names.get(&info_hash).map_or("<unknown>", String::as_str),
            info_hash,
            status,
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(b.name));

    if json {
        let report = UpdateReport {
            update,
            statuses: rows,
        };
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    println!(
        "tick {}: drained {} deltas, {} transfers",
        update.tick, update.drained, update.transfers
    );
    println!(
        "  {:<18} {:<9} {:>12} {:>12} {:>10} {:>6} {:>6}",
        "NAME", "STATE", "UPLOADED", "DOWNLOADED", "LEFT", "LEECH", "SEED"
    );
    for row in rows {
        let status = row.status;
        println!(
            "  {:<18} {:<9} {:>12} {:>12} {:>10} {:>6} {:>6}",
            row.name,
            format!("{:?}", status.state),
            status.uploaded,
            status.downloaded,
            status.left,
            peer_count(status.incomplete),
            peer_count(status.complete),
        );
    }

    Ok(())
}

fn peer_count(count: Option<u32>) -> String {
    count.map_or_else(|| "-".to_string(), |count| count.to_string())
}

/// One simulated remote peer of a transfer.
///
/// Reports random traffic into the delta buffer, occasionally finishes a
/// piece, and sends the completion once the transfer's last piece is in.
async fn run_peer(
    transfer: Arc<SimulatedTransfer>,
    buffer: DeltaBuffer,
    handles: watch::Receiver<StatusHandle>,
    deadline: Instant,
    mut rng: StdRng,
) {
    let mut announced = false;

    while Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(rng.random_range(10..=100))).await;

        buffer.record(
            transfer.info_hash,
            rng.random_range(0..=PIECE_SIZE / 4),
            rng.random_range(0..=PIECE_SIZE / 2),
        );

        let handle = handles.borrow().clone();
        if !announced {
            let leechers = rng.random_range(0..50);
            let seeders = rng.random_range(0..20);
            if handle
                .tracker_stat(transfer.info_hash, Some(leechers), Some(seeders))
                .is_err()
            {
                return;
            }
            announced = true;
        }

        if !rng.random_bool(0.3) || !transfer.claim_piece() {
            continue;
        }

        buffer.record_downloaded(transfer.info_hash, PIECE_SIZE);
        if handle
            .completed_piece(transfer.info_hash, PIECE_SIZE)
            .is_err()
        {
            tracing::debug!(info_hash = %transfer.info_hash, "Aggregator gone, peer stopping");
            return;
        }
        if transfer.report_piece() && handle.torrent_completed(transfer.info_hash).is_err() {
            return;
        }
    }
}

/// Stands in for the tracker component: logs completion signals.
///
/// Returns the number of completed transfers once every notifier is gone.
async fn run_tracker(
    mut signals: mpsc::UnboundedReceiver<TrackerSignal>,
    names: Arc<HashMap<InfoHash, String>>,
) -> usize {
    let mut completed = 0;
    while let Some(signal) = signals.recv().await {
        match signal {
            TrackerSignal::Completed { info_hash } => {
                completed += 1;
                let name = names.get(&info_hash).map_or("<unknown>", String::as_str);
                tracing::info!(%info_hash, transfer = name, "Transfer completed, announcing to tracker");
            }
        }
    }
    completed
}
