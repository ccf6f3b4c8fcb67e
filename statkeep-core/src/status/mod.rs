//! Per-transfer status aggregation.
//!
//! A single actor task owns the authoritative map of transfer statuses.
//! Peer workers report byte deltas into a shared [`DeltaBuffer`]; a
//! self-rescheduling timer asks the actor to drain it on a fixed period.
//! Everything else (inserts, removals, tracker stats, piece completion,
//! queries) arrives as messages on the actor's mailbox through a
//! [`StatusHandle`].

pub mod actor;
pub mod aggregator;
pub mod commands;
pub mod counters;
pub mod delta_buffer;
pub mod handle;
pub mod snapshot;
pub mod timer;

use std::path::PathBuf;

pub use actor::{AggregatorTask, spawn_status_aggregator};
pub use aggregator::StatusAggregator;
pub use commands::{
    StatsUpdate, StatusCommand, TrackerNotifier, TrackerSignal, TransferState, TransferStatus,
};
pub use counters::ProcessCounters;
pub use delta_buffer::{DeltaBuffer, DeltaRecord};
pub use handle::StatusHandle;
pub use snapshot::CountersSnapshot;

use crate::torrent::InfoHash;

/// Errors raised by the status aggregator and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Transfer {info_hash} not found")]
    TransferNotFound { info_hash: InfoHash },

    #[error("Transfer {info_hash} reported complete with {left} bytes left")]
    CompletionInvariant { info_hash: InfoHash, left: u64 },

    #[error("Status aggregator has shut down")]
    AggregatorShutdown,

    #[error("Status aggregator panicked: {reason}")]
    AggregatorPanicked { reason: String },

    #[error("Invalid snapshot {path:?}: {reason}")]
    InvalidSnapshot { path: PathBuf, reason: String },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}
