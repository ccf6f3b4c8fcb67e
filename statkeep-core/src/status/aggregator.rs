//! Authoritative transfer map owned by the status aggregator actor.

use std::collections::HashMap;
use std::sync::Arc;

use super::StatusError;
use super::commands::{StatsUpdate, TrackerNotifier, TrackerSignal, TransferState, TransferStatus};
use super::counters::ProcessCounters;
use super::delta_buffer::{DeltaBuffer, DeltaRecord};
use crate::torrent::InfoHash;

#[derive(Debug)]
struct TransferEntry {
    status: TransferStatus,
    notifier: TrackerNotifier,
}

/// Per-transfer status map and the rules for mutating it.
///
/// Not shared: the actor task owns the only instance and applies commands
/// one at a time, so none of the methods here need locking.
#[derive(Debug)]
pub struct StatusAggregator {
    transfers: HashMap<InfoHash, TransferEntry>,
    counters: Arc<ProcessCounters>,
    ticks: u64,
}

impl StatusAggregator {
    pub fn new(counters: Arc<ProcessCounters>) -> Self {
        Self {
            transfers: HashMap::new(),
            counters,
            ticks: 0,
        }
    }

    /// Creates or replaces a transfer. Zero `left` starts it as seeding.
    pub fn insert_transfer(&mut self, info_hash: InfoHash, left: u64, notifier: TrackerNotifier) {
        let status = TransferStatus::new(left);
        tracing::debug!(%info_hash, left, state = ?status.state, "Inserting transfer");
        let replaced = self
            .transfers
            .insert(info_hash, TransferEntry { status, notifier });
        if replaced.is_some() {
            tracing::debug!(%info_hash, "Replaced existing transfer status");
        }
    }

    /// Forgets a transfer. Returns false if it was not tracked.
    pub fn remove_transfer(&mut self, info_hash: InfoHash) -> bool {
        let removed = self.transfers.remove(&info_hash).is_some();
        tracing::debug!(%info_hash, removed, "Removing transfer");
        removed
    }

    /// Stores the peer counts last reported by the tracker.
    ///
    /// Unknown transfers are ignored; the update may race with removal.
    pub fn update_tracker_stat(
        &mut self,
        info_hash: InfoHash,
        incomplete: Option<u32>,
        complete: Option<u32>,
    ) {
        match self.transfers.get_mut(&info_hash) {
            Some(entry) => {
                entry.status.incomplete = incomplete;
                entry.status.complete = complete;
            }
            None => tracing::debug!(%info_hash, "Tracker stat for unknown transfer ignored"),
        }
    }

    /// Subtracts a verified piece from the bytes left.
    ///
    /// Unknown transfers are ignored. Subtracting more than is left clamps
    /// at zero.
    pub fn complete_piece(&mut self, info_hash: InfoHash, bytes: u64) {
        let Some(entry) = self.transfers.get_mut(&info_hash) else {
            tracing::debug!(%info_hash, bytes, "Completed piece for unknown transfer ignored");
            return;
        };
        if bytes > entry.status.left {
            tracing::warn!(
                %info_hash,
                bytes,
                left = entry.status.left,
                "Completed piece larger than remaining bytes"
            );
        }
        entry.status.left = entry.status.left.saturating_sub(bytes);
    }

    /// Marks a fully downloaded transfer as seeding and tells its tracker
    /// worker.
    ///
    /// Every accepted completion sends one signal, including for a
    /// transfer that was inserted as seeding.
    ///
    /// # Errors
    /// - `StatusError::TransferNotFound` - Info hash is not tracked
    /// - `StatusError::CompletionInvariant` - Bytes are still left
    pub fn complete_torrent(&mut self, info_hash: InfoHash) -> Result<(), StatusError> {
        let entry = self
            .transfers
            .get_mut(&info_hash)
            .ok_or(StatusError::TransferNotFound { info_hash })?;

        if entry.status.left != 0 {
            return Err(StatusError::CompletionInvariant {
                info_hash,
                left: entry.status.left,
            });
        }

        entry.status.state = TransferState::Seeding;
        tracing::info!(%info_hash, "Transfer completed, now seeding");
        if entry
            .notifier
            .send(TrackerSignal::Completed { info_hash })
            .is_err()
        {
            tracing::debug!(%info_hash, "Tracker worker gone, completion signal dropped");
        }
        Ok(())
    }

    /// Returns a copy of one transfer's status.
    ///
    /// # Errors
    /// - `StatusError::TransferNotFound` - Info hash is not tracked
    pub fn status(&self, info_hash: InfoHash) -> Result<TransferStatus, StatusError> {
        self.transfers
            .get(&info_hash)
            .map(|entry| entry.status)
            .ok_or(StatusError::TransferNotFound { info_hash })
    }

    /// Copies every tracked status.
    pub fn all_transfers(&self) -> HashMap<InfoHash, TransferStatus> {
        self.transfers
            .iter()
            .map(|(info_hash, entry)| (*info_hash, entry.status))
            .collect()
    }

    /// Folds drained deltas into the map and the process counters.
    ///
    /// Deltas for transfers that are no longer tracked are dropped. Returns
    /// the number of records applied.
    pub fn apply_deltas(&mut self, records: &[DeltaRecord]) -> usize {
        let mut applied = 0;
        for record in records {
            let Some(entry) = self.transfers.get_mut(&record.info_hash) else {
                tracing::trace!(info_hash = %record.info_hash, "Dropping delta for removed transfer");
                continue;
            };
            entry.status.uploaded = entry.status.uploaded.saturating_add(record.uploaded);
            entry.status.downloaded = entry.status.downloaded.saturating_add(record.downloaded);
            self.counters.add(record.uploaded, record.downloaded);
            applied += 1;
        }
        applied
    }

    /// Drains `buffer` and reports what the tick did.
    pub fn drain(&mut self, buffer: &DeltaBuffer) -> StatsUpdate {
        let records = buffer.drain();
        let applied = self.apply_deltas(&records);
        self.ticks += 1;
        tracing::trace!(
            tick = self.ticks,
            drained = records.len(),
            applied,
            "Drained delta buffer"
        );
        StatsUpdate {
            tick: self.ticks,
            drained: records.len(),
            transfers: self.transfers.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn counters(&self) -> &Arc<ProcessCounters> {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    use super::*;

    fn aggregator() -> StatusAggregator {
        StatusAggregator::new(Arc::new(ProcessCounters::new()))
    }

    fn notifier() -> (TrackerNotifier, mpsc::UnboundedReceiver<TrackerSignal>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_insert_derives_state_from_left() {
        let mut aggregator = aggregator();
        let seed = InfoHash::new([1; 20]);
        let leech = InfoHash::new([2; 20]);

        aggregator.insert_transfer(seed, 0, notifier().0);
        aggregator.insert_transfer(leech, 100, notifier().0);

        assert_eq!(aggregator.status(seed).unwrap().state, TransferState::Seeding);
        assert_eq!(aggregator.status(leech).unwrap().state, TransferState::Leeching);
        assert_eq!(aggregator.len(), 2);
    }

    #[test]
    fn test_insert_overwrites_existing_transfer() {
        let mut aggregator = aggregator();
        let info_hash = InfoHash::new([1; 20]);
        let buffer = DeltaBuffer::new();

        aggregator.insert_transfer(info_hash, 100, notifier().0);
        buffer.record(info_hash, 5, 5);
        aggregator.drain(&buffer);

        aggregator.insert_transfer(info_hash, 0, notifier().0);
        let status = aggregator.status(info_hash).unwrap();
        assert_eq!(status, TransferStatus::new(0));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut aggregator = aggregator();
        assert!(!aggregator.remove_transfer(InfoHash::new([3; 20])));
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_tracker_stat_updates_peer_counts() {
        let mut aggregator = aggregator();
        let info_hash = InfoHash::new([1; 20]);
        aggregator.insert_transfer(info_hash, 10, notifier().0);

        aggregator.update_tracker_stat(info_hash, Some(4), Some(9));
        let status = aggregator.status(info_hash).unwrap();
        assert_eq!(status.incomplete, Some(4));
        assert_eq!(status.complete, Some(9));

        aggregator.update_tracker_stat(info_hash, None, Some(10));
        let status = aggregator.status(info_hash).unwrap();
        assert_eq!(status.incomplete, None);
        assert_eq!(status.complete, Some(10));

        // Unknown transfer: nothing happens
        aggregator.update_tracker_stat(InfoHash::new([2; 20]), Some(1), Some(1));
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn test_completed_piece_decrements_left() {
        let mut aggregator = aggregator();
        let info_hash = InfoHash::new([1; 20]);
        aggregator.insert_transfer(info_hash, 100, notifier().0);

        aggregator.complete_piece(info_hash, 30);
        assert_eq!(aggregator.status(info_hash).unwrap().left, 70);

        aggregator.complete_piece(info_hash, 500);
        assert_eq!(aggregator.status(info_hash).unwrap().left, 0);
        // Still leeching until completion is reported
        assert_eq!(
            aggregator.status(info_hash).unwrap().state,
            TransferState::Leeching
        );

        aggregator.complete_piece(InfoHash::new([2; 20]), 10);
        assert!(aggregator.status(InfoHash::new([2; 20])).is_err());
    }

    #[test]
    fn test_complete_torrent_sends_one_signal() {
        let mut aggregator = aggregator();
        let info_hash = InfoHash::new([1; 20]);
        let (tx, mut rx) = notifier();
        aggregator.insert_transfer(info_hash, 100, tx);

        aggregator.complete_piece(info_hash, 100);
        aggregator.complete_torrent(info_hash).unwrap();

        assert!(aggregator.status(info_hash).unwrap().is_seeding());
        assert_eq!(rx.try_recv(), Ok(TrackerSignal::Completed { info_hash }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_complete_torrent_inserted_as_seeding_signals() {
        let mut aggregator = aggregator();
        let info_hash = InfoHash::new([1; 20]);
        let (tx, mut rx) = notifier();
        aggregator.insert_transfer(info_hash, 0, tx);

        aggregator.complete_torrent(info_hash).unwrap();

        assert!(aggregator.status(info_hash).unwrap().is_seeding());
        assert_eq!(rx.try_recv(), Ok(TrackerSignal::Completed { info_hash }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_each_completion_sends_a_signal() {
        let mut aggregator = aggregator();
        let info_hash = InfoHash::new([1; 20]);
        let (tx, mut rx) = notifier();
        aggregator.insert_transfer(info_hash, 0, tx);

        aggregator.complete_torrent(info_hash).unwrap();
        aggregator.complete_torrent(info_hash).unwrap();

        assert_eq!(rx.try_recv(), Ok(TrackerSignal::Completed { info_hash }));
        assert_eq!(rx.try_recv(), Ok(TrackerSignal::Completed { info_hash }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_complete_torrent_with_bytes_left_fails() {
        let mut aggregator = aggregator();
        let info_hash = InfoHash::new([1; 20]);
        let (tx, mut rx) = notifier();
        aggregator.insert_transfer(info_hash, 100, tx);
        aggregator.complete_piece(info_hash, 60);

        let result = aggregator.complete_torrent(info_hash);
        assert!(matches!(
            result,
            Err(StatusError::CompletionInvariant { left: 40, .. })
        ));
        assert_eq!(
            aggregator.status(info_hash).unwrap().state,
            TransferState::Leeching
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_complete_unknown_torrent_fails() {
        let mut aggregator = aggregator();
        let result = aggregator.complete_torrent(InfoHash::new([5; 20]));
        assert!(matches!(result, Err(StatusError::TransferNotFound { .. })));
    }

    #[test]
    fn test_completion_with_dropped_tracker_worker() {
        let mut aggregator = aggregator();
        let info_hash = InfoHash::new([1; 20]);
        let (tx, rx) = notifier();
        drop(rx);
        aggregator.insert_transfer(info_hash, 0, tx);
        aggregator.update_tracker_stat(info_hash, Some(1), None);

        let other = InfoHash::new([2; 20]);
        let (tx, rx) = notifier();
        drop(rx);
        aggregator.insert_transfer(other, 1, tx);
        aggregator.complete_piece(other, 1);
        assert!(aggregator.complete_torrent(other).is_ok());
    }

    #[test]
    fn test_status_of_unknown_transfer() {
        let aggregator = aggregator();
        let info_hash = InfoHash::new([8; 20]);
        assert!(matches!(
            aggregator.status(info_hash),
            Err(StatusError::TransferNotFound { info_hash: missing }) if missing == info_hash
        ));
    }

    #[test]
    fn test_drain_applies_deltas_and_counters() {
        let mut aggregator = aggregator();
        let buffer = DeltaBuffer::new();
        let a = InfoHash::new([1; 20]);
        let b = InfoHash::new([2; 20]);
        aggregator.insert_transfer(a, 1000, notifier().0);
        aggregator.insert_transfer(b, 1000, notifier().0);

        buffer.record(a, 50, 200);
        buffer.record(b, 1, 2);
        buffer.record(a, 10, 0);
        let update = aggregator.drain(&buffer);

        assert_eq!(update.tick, 1);
        assert_eq!(update.drained, 2);
        assert_eq!(update.transfers, 2);

        let status = aggregator.status(a).unwrap();
        assert_eq!((status.uploaded, status.downloaded, status.left), (60, 200, 1000));
        assert_eq!(aggregator.counters().uploaded(), 61);
        assert_eq!(aggregator.counters().downloaded(), 202);
    }

    #[test]
    fn test_drain_empty_buffer_changes_nothing() {
        let mut aggregator = aggregator();
        let buffer = DeltaBuffer::new();
        let info_hash = InfoHash::new([1; 20]);
        aggregator.insert_transfer(info_hash, 10, notifier().0);
        buffer.record(info_hash, 3, 4);
        aggregator.drain(&buffer);
        let before = aggregator.all_transfers();

        let first = aggregator.drain(&buffer);
        let second = aggregator.drain(&buffer);

        assert_eq!(first.drained, 0);
        assert_eq!(second.drained, 0);
        assert_eq!(second.tick, 3);
        assert_eq!(aggregator.all_transfers(), before);
    }

    #[test]
    fn test_delta_after_removal_is_dropped() {
        let mut aggregator = aggregator();
        let buffer = DeltaBuffer::new();
        let info_hash = InfoHash::new([1; 20]);
        aggregator.insert_transfer(info_hash, 10, notifier().0);

        buffer.record(info_hash, 5, 5);
        aggregator.remove_transfer(info_hash);
        let update = aggregator.drain(&buffer);

        assert_eq!(update.drained, 1);
        assert_eq!(update.transfers, 0);
        assert!(aggregator.all_transfers().is_empty());
        assert_eq!(aggregator.counters().uploaded(), 0);
    }

    proptest! {
        #[test]
        fn prop_counters_never_decrease(
            batches in prop::collection::vec(
                prop::collection::vec((0u8..4, 0u64..1_000_000, 0u64..1_000_000), 0..16),
                1..16,
            )
        ) {
            let mut aggregator = aggregator();
            let buffer = DeltaBuffer::new();
            let ids: Vec<InfoHash> = (0u8..4).map(|i| InfoHash::new([i; 20])).collect();
            for id in &ids {
                aggregator.insert_transfer(*id, 1 << 40, notifier().0);
            }

            let mut previous = aggregator.all_transfers();
            for batch in batches {
                for (index, uploaded, downloaded) in batch {
                    buffer.record(ids[index as usize], uploaded, downloaded);
                }
                aggregator.drain(&buffer);

                let current = aggregator.all_transfers();
                for id in &ids {
                    prop_assert!(current[id].uploaded >= previous[id].uploaded);
                    prop_assert!(current[id].downloaded >= previous[id].downloaded);
                    prop_assert_eq!(current[id].left, previous[id].left);
                }
                previous = current;
            }
        }

        #[test]
        fn prop_total_matches_recorded_sum(
            deltas in prop::collection::vec((0u64..10_000, 0u64..10_000), 0..64)
        ) {
            let mut aggregator = aggregator();
            let buffer = DeltaBuffer::new();
            let info_hash = InfoHash::new([1; 20]);
            aggregator.insert_transfer(info_hash, 1, notifier().0);

            for (uploaded, downloaded) in &deltas {
                buffer.record(info_hash, *uploaded, *downloaded);
            }
            aggregator.drain(&buffer);

            let status = aggregator.status(info_hash).unwrap();
            prop_assert_eq!(status.uploaded, deltas.iter().map(|d| d.0).sum::<u64>());
            prop_assert_eq!(status.downloaded, deltas.iter().map(|d| d.1).sum::<u64>());
        }
    }
}
