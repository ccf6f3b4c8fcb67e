//! Actor implementation for the status aggregator.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::StatusError;
use super::aggregator::StatusAggregator;
use super::commands::{StatsUpdate, StatusCommand};
use super::counters::ProcessCounters;
use super::delta_buffer::DeltaBuffer;
use super::handle::StatusHandle;
use super::timer::TickTimer;
use crate::config::StatusConfig;

/// A running aggregator: its handle and the task a parent supervises.
///
/// The join handle resolves to `Ok(())` after a requested shutdown or once
/// every handle is dropped, and to the fatal error otherwise.
#[derive(Debug)]
pub struct AggregatorTask {
    pub handle: StatusHandle,
    pub join: JoinHandle<Result<(), StatusError>>,
}

/// Spawns the status aggregator actor and returns its handle and task.
///
/// The aggregator starts with an empty transfer map, drains `buffer` every
/// `config.aggregator.tick_interval`, and accumulates process-wide totals
/// into `counters`.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use std::sync::Arc;
///
/// use statkeep_core::config::StatusConfig;
/// use statkeep_core::status::{DeltaBuffer, ProcessCounters, spawn_status_aggregator};
///
/// let buffer = DeltaBuffer::new();
/// let task = spawn_status_aggregator(
///     &StatusConfig::default(),
///     buffer.clone(),
///     Arc::new(ProcessCounters::new()),
/// );
/// task.handle.shutdown().await.unwrap();
/// # }
/// ```
pub fn spawn_status_aggregator(
    config: &StatusConfig,
    buffer: DeltaBuffer,
    counters: Arc<ProcessCounters>,
) -> AggregatorTask {
    let (sender, receiver) = mpsc::unbounded_channel();
    let (stats, _) = broadcast::channel(config.aggregator.stats_channel_capacity.max(1));

    let actor = AggregatorActor {
        aggregator: StatusAggregator::new(counters.clone()),
        buffer,
        timer: TickTimer::new(sender.downgrade(), config.aggregator.tick_interval),
        stats,
        hook: TerminationHook::new(config.persistence.snapshot_path.clone(), counters),
    };

    let join = tokio::spawn(run_actor_loop(actor, receiver));

    AggregatorTask {
        handle: StatusHandle::new(sender),
        join,
    }
}

struct AggregatorActor {
    aggregator: StatusAggregator,
    buffer: DeltaBuffer,
    timer: TickTimer,
    stats: broadcast::Sender<StatsUpdate>,
    hook: TerminationHook,
}

/// Runs the main actor message processing loop.
///
/// Commands are handled one by one in arrival order. The loop ends on
/// `Shutdown`, when every handle has been dropped, or on the first fatal
/// command failure, which is returned to the supervising parent.
async fn run_actor_loop(
    mut actor: AggregatorActor,
    mut receiver: mpsc::UnboundedReceiver<StatusCommand>,
) -> Result<(), StatusError> {
    tracing::debug!(
        tick_interval = ?actor.timer.period(),
        "Status aggregator actor started"
    );
    actor.timer.arm();

    let result = loop {
        let Some(command) = receiver.recv().await else {
            tracing::debug!("All status handles dropped");
            break Ok(());
        };

        match actor.handle_command(command) {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) => break Ok(()),
            Err(error) => {
                tracing::error!(%error, "Status aggregator stopping on fatal error");
                break Err(error);
            }
        }
    };

    receiver.close();
    actor.hook.run();
    tracing::debug!("Status aggregator actor stopped");
    result
}

impl AggregatorActor {
    /// Handles a single command.
    fn handle_command(&mut self, command: StatusCommand) -> Result<ControlFlow<()>, StatusError> {
        tracing::trace!(command = command.name(), "Handling status command");

        match command {
            StatusCommand::InsertTransfer {
                info_hash,
                left,
                notifier,
            } => self.aggregator.insert_transfer(info_hash, left, notifier),

            StatusCommand::RemoveTransfer { info_hash } => {
                self.aggregator.remove_transfer(info_hash);
            }

            StatusCommand::TrackerStat {
                info_hash,
                incomplete,
                complete,
            } => self
                .aggregator
                .update_tracker_stat(info_hash, incomplete, complete),

            StatusCommand::CompletedPiece { info_hash, bytes } => {
                self.aggregator.complete_piece(info_hash, bytes)
            }

            StatusCommand::TorrentCompleted { info_hash } => {
                self.aggregator.complete_torrent(info_hash)?;
            }

            StatusCommand::RequestStatus {
                info_hash,
                responder,
            } => match self.aggregator.status(info_hash) {
                Ok(status) => {
                    let _ = responder.send(Ok(status));
                }
                Err(error) => {
                    // Querying an untracked transfer is a caller bug; stop
                    let _ = responder.send(Err(StatusError::TransferNotFound { info_hash }));
                    return Err(error);
                }
            },

            StatusCommand::RequestAllTransfers { responder } => {
                let _ = responder.send(self.aggregator.all_transfers());
            }

            StatusCommand::SubscribeStats { responder } => {
                let _ = responder.send(self.stats.subscribe());
            }

            StatusCommand::TimerTick => {
                let update = self.aggregator.drain(&self.buffer);
                // No subscribers is fine
                let _ = self.stats.send(update);
                self.timer.arm();
            }

            StatusCommand::Shutdown { responder } => {
                tracing::debug!("Status aggregator actor shutting down");
                self.hook.run();
                let _ = responder.send(());
                return Ok(ControlFlow::Break(()));
            }

            #[cfg(test)]
            StatusCommand::Panic => panic!("status aggregator panic requested"),
        }

        Ok(ControlFlow::Continue(()))
    }
}

/// Final action of an aggregator: persist the process counters.
///
/// Runs exactly once, either explicitly when the loop ends or from `Drop`
/// when the task panics or is aborted by its parent.
struct TerminationHook {
    snapshot_path: Option<PathBuf>,
    counters: Arc<ProcessCounters>,
    fired: bool,
}

impl TerminationHook {
    fn new(snapshot_path: Option<PathBuf>, counters: Arc<ProcessCounters>) -> Self {
        Self {
            snapshot_path,
            counters,
            fired: false,
        }
    }

    fn run(&mut self) {
        if std::mem::replace(&mut self.fired, true) {
            return;
        }
        let Some(path) = &self.snapshot_path else {
            tracing::debug!("No snapshot path configured, skipping counters snapshot");
            return;
        };

        let snapshot = self.counters.snapshot();
        match snapshot.write_to(path) {
            Ok(()) => tracing::info!(
                path = %path.display(),
                uploaded = snapshot.uploaded,
                downloaded = snapshot.downloaded,
                "Wrote counters snapshot"
            ),
            Err(error) => tracing::error!(
                path = %path.display(),
                %error,
                "Failed to write counters snapshot"
            ),
        }
    }
}

impl Drop for TerminationHook {
    fn drop(&mut self) {
        self.run();
    }
}
