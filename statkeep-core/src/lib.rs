//! Statkeep Core - Per-transfer status aggregation for a BitTorrent client
//!
//! Peer workers record byte deltas into a shared buffer that a single
//! aggregator actor drains on a fixed period, merging them into an
//! authoritative per-transfer status map. Process-wide totals are persisted
//! when the aggregator terminates, and a supervising parent restarts it after
//! failures.

pub mod config;
pub mod status;
pub mod supervisor;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::StatusConfig;
pub use status::{DeltaBuffer, StatusError, StatusHandle};
pub use supervisor::Supervisor;
pub use torrent::InfoHash;

pub type Result<T> = std::result::Result<T, StatusError>;
