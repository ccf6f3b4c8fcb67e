//! Command definitions for the status aggregator actor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::StatusError;
use crate::torrent::InfoHash;

/// Sending half of a transfer's tracker-communication channel.
///
/// Supplied on insert and owned by the tracker worker; the aggregator only
/// sends completion signals on it.
pub type TrackerNotifier = mpsc::UnboundedSender<TrackerSignal>;

/// Signals pushed to a transfer's tracker-communication worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerSignal {
    /// The transfer has every byte and is now seeding.
    Completed { info_hash: InfoHash },
}

/// Commands that can be sent to the status aggregator actor.
///
/// Commands are processed strictly one at a time in arrival order. Queries
/// carry a oneshot responder so callers wait on their own reply slot rather
/// than on the actor's mailbox.
#[derive(Debug)]
pub enum StatusCommand {
    /// Create or replace a transfer's status.
    InsertTransfer {
        info_hash: InfoHash,
        left: u64,
        notifier: TrackerNotifier,
    },
    /// Forget a transfer. Unknown hashes are ignored.
    RemoveTransfer { info_hash: InfoHash },
    /// Record the latest peer counts reported by the tracker.
    TrackerStat {
        info_hash: InfoHash,
        incomplete: Option<u32>,
        complete: Option<u32>,
    },
    /// A verified piece of `bytes` length was written.
    CompletedPiece { info_hash: InfoHash, bytes: u64 },
    /// Every piece is done; notify the tracker worker and start seeding.
    TorrentCompleted { info_hash: InfoHash },
    /// Get the current status of one transfer.
    RequestStatus {
        info_hash: InfoHash,
        responder: oneshot::Sender<Result<TransferStatus, StatusError>>,
    },
    /// Get a snapshot of every tracked transfer.
    RequestAllTransfers {
        responder: oneshot::Sender<HashMap<InfoHash, TransferStatus>>,
    },
    /// Subscribe to the stats-available broadcast sent after every tick.
    SubscribeStats {
        responder: oneshot::Sender<broadcast::Receiver<StatsUpdate>>,
    },
    /// Drain the delta buffer and re-arm the timer.
    TimerTick,
    /// Run the termination hook and stop the actor.
    Shutdown { responder: oneshot::Sender<()> },
    /// Panic inside the actor loop.
    #[cfg(test)]
    Panic,
}

impl StatusCommand {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            StatusCommand::InsertTransfer { .. } => "insert_transfer",
            StatusCommand::RemoveTransfer { .. } => "remove_transfer",
            StatusCommand::TrackerStat { .. } => "tracker_stat",
            StatusCommand::CompletedPiece { .. } => "completed_piece",
            StatusCommand::TorrentCompleted { .. } => "torrent_completed",
            StatusCommand::RequestStatus { .. } => "request_status",
            StatusCommand::RequestAllTransfers { .. } => "request_all_transfers",
            StatusCommand::SubscribeStats { .. } => "subscribe_stats",
            StatusCommand::TimerTick => "timer_tick",
            StatusCommand::Shutdown { .. } => "shutdown",
            #[cfg(test)]
            StatusCommand::Panic => "panic",
        }
    }
}

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    /// Bytes are still missing.
    Leeching,
    /// Nothing left to download.
    Seeding,
}

/// Authoritative counters for a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    /// Bytes uploaded since the transfer was inserted
    pub uploaded: u64,
    /// Bytes downloaded since the transfer was inserted
    pub downloaded: u64,
    /// Bytes still missing
    pub left: u64,
    /// Leechers last reported by the tracker
    pub incomplete: Option<u32>,
    /// Seeders last reported by the tracker
    pub complete: Option<u32>,
    pub state: TransferState,
}

impl TransferStatus {
    /// Creates a fresh status; zero bytes left means the transfer is seeding.
    pub fn new(left: u64) -> Self {
        let state = if left == 0 {
            TransferState::Seeding
        } else {
            TransferState::Leeching
        };
        Self {
            uploaded: 0,
            downloaded: 0,
            left,
            incomplete: None,
            complete: None,
            state,
        }
    }

    /// Returns true once the transfer has switched to seeding.
    pub fn is_seeding(&self) -> bool {
        self.state == TransferState::Seeding
    }
}

/// Broadcast after every timer-driven drain.
///
/// Tells the tracker side that fresh aggregate numbers can be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsUpdate {
    /// Sequence number of the tick, starting at 1
    pub tick: u64,
    /// Delta records applied or dropped by this drain
    pub drained: usize,
    /// Transfers tracked after the drain
    pub transfers: usize,
}
