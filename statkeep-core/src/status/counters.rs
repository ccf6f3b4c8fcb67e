use std::sync::atomic::{AtomicU64, Ordering};

use super::StatusError;
use super::snapshot::CountersSnapshot;
use crate::config::PersistenceConfig;

/// Process-wide transfer totals.
///
/// Shared between successive aggregator instances so totals survive a
/// restart; only the running aggregator writes to them, alongside its
/// per-transfer updates.
#[derive(Default, Debug)]
pub struct ProcessCounters {
    uploaded: AtomicU64,
    downloaded: AtomicU64,
}

impl ProcessCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from totals persisted by a previous run.
    pub fn from_snapshot(snapshot: &CountersSnapshot) -> Self {
        Self {
            uploaded: AtomicU64::new(snapshot.uploaded),
            downloaded: AtomicU64::new(snapshot.downloaded),
        }
    }

    /// Creates the process counters at startup.
    ///
    /// When resuming is enabled and a snapshot exists, totals continue from
    /// it; otherwise they start at zero.
    ///
    /// # Errors
    /// - `StatusError::Io` - Snapshot exists but could not be read
    /// - `StatusError::InvalidSnapshot` - Snapshot contents are malformed
    pub fn initialize(persistence: &PersistenceConfig) -> Result<Self, StatusError> {
        let Some(path) = persistence
            .snapshot_path
            .as_deref()
            .filter(|_| persistence.resume_from_snapshot)
        else {
            return Ok(Self::new());
        };

        match CountersSnapshot::read_from(path)? {
            Some(snapshot) => {
                tracing::info!(
                    path = %path.display(),
                    uploaded = snapshot.uploaded,
                    downloaded = snapshot.downloaded,
                    version = %snapshot.version,
                    "Resuming counters from snapshot"
                );
                Ok(Self::from_snapshot(&snapshot))
            }
            None => Ok(Self::new()),
        }
    }

    /// Adds to both totals, clamping at `u64::MAX` like per-transfer totals.
    pub fn add(&self, uploaded: u64, downloaded: u64) {
        saturating_add(&self.uploaded, uploaded);
        saturating_add(&self.downloaded, downloaded);
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Acquire)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot::new(self.uploaded(), self.downloaded())
    }
}

fn saturating_add(counter: &AtomicU64, value: u64) {
    if value == 0 {
        return;
    }
    // The closure always returns Some, so the update cannot fail
    let _ = counter.fetch_update(Ordering::Release, Ordering::Relaxed, |current| {
        Some(current.saturating_add(value))
    });
}
