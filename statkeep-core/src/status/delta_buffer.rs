//! Concurrently writable buffer of per-transfer byte deltas.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::torrent::InfoHash;

/// Bytes moved for one transfer since the previous drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaRecord {
    pub info_hash: InfoHash,
    pub uploaded: u64,
    pub downloaded: u64,
}

/// Shared collection of pending deltas.
///
/// Peer workers call [`DeltaBuffer::record`] from any thread; the status
/// aggregator calls [`DeltaBuffer::drain`] on every timer tick. Records for
/// the same transfer are summed on append, which keeps totals exact while
/// bounding memory to one entry per transfer.
///
/// Drain swaps the whole map out under one lock acquisition, so an append
/// lands either in the returned batch or in the next one, never in both and
/// never in neither.
#[derive(Debug, Clone, Default)]
pub struct DeltaBuffer {
    pending: Arc<Mutex<HashMap<InfoHash, (u64, u64)>>>,
}

impl DeltaBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `uploaded` and `downloaded` bytes to the pending delta of a transfer.
    pub fn record(&self, info_hash: InfoHash, uploaded: u64, downloaded: u64) {
        if uploaded == 0 && downloaded == 0 {
            return;
        }
        let mut pending = self.pending.lock();
        let entry = pending.entry(info_hash).or_insert((0, 0));
        entry.0 = entry.0.saturating_add(uploaded);
        entry.1 = entry.1.saturating_add(downloaded);
    }

    pub fn record_uploaded(&self, info_hash: InfoHash, bytes: u64) {
        self.record(info_hash, bytes, 0);
    }

    pub fn record_downloaded(&self, info_hash: InfoHash, bytes: u64) {
        self.record(info_hash, 0, bytes);
    }

    /// Takes every pending record and leaves the buffer empty.
    pub fn drain(&self) -> Vec<DeltaRecord> {
        let pending = std::mem::take(&mut *self.pending.lock());
        pending
            .into_iter()
            .map(|(info_hash, (uploaded, downloaded))| DeltaRecord {
                info_hash,
                uploaded,
                downloaded,
            })
            .collect()
    }

    /// Number of transfers with a pending delta.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
