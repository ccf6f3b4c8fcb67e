//! Integration tests for the supervised status aggregator and its producers.

use std::sync::Arc;

use futures::future::join_all;
use statkeep_core::config::{RestartPolicy, StatusConfig};
use statkeep_core::status::snapshot::CountersSnapshot;
use statkeep_core::status::{
    AggregatorTask, DeltaBuffer, ProcessCounters, StatsUpdate, TrackerSignal, TransferState,
    spawn_status_aggregator,
};
use statkeep_core::{InfoHash, StatusError, StatusHandle, Supervisor};
use tokio::sync::{broadcast, mpsc};
use tokio_test::{assert_err, assert_ok};

/// Aggregator spawned with default timing plus the buffer its producers share.
struct AggregatorFixture {
    task: AggregatorTask,
    buffer: DeltaBuffer,
    counters: Arc<ProcessCounters>,
    updates: broadcast::Receiver<StatsUpdate>,
}

impl AggregatorFixture {
    async fn start(config: &StatusConfig) -> Self {
        let buffer = DeltaBuffer::new();
        let counters = Arc::new(ProcessCounters::new());
        let task = spawn_status_aggregator(config, buffer.clone(), counters.clone());
        let updates = task.handle.subscribe_stats().await.unwrap();

        Self {
            task,
            buffer,
            counters,
            updates,
        }
    }

    fn handle(&self) -> &StatusHandle {
        &self.task.handle
    }

    async fn next_tick(&mut self) -> StatsUpdate {
        self.updates.recv().await.unwrap()
    }

    async fn finish(self) -> Result<(), StatusError> {
        self.task.handle.shutdown().await?;
        self.task.join.await.unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_producers_lose_no_updates() {
    const PRODUCERS: u64 = 16;
    const APPENDS: u64 = 250;
    const DELTA: u64 = 3;

    let mut fixture = AggregatorFixture::start(&StatusConfig::default()).await;
    let info_hash = InfoHash::digest("shared transfer");
    fixture
        .handle()
        .insert_transfer(info_hash, 1 << 20, mpsc::unbounded_channel().0)
        .unwrap();

    let producers = (0..PRODUCERS).map(|_| {
        let buffer = fixture.buffer.clone();
        tokio::spawn(async move {
            for _ in 0..APPENDS {
                buffer.record(info_hash, DELTA, DELTA * 2);
                tokio::task::yield_now().await;
            }
        })
    });
    for result in join_all(producers).await {
        assert_ok!(result);
    }

    let update = fixture.next_tick().await;
    assert_eq!(update.drained, 1);

    let status = fixture.handle().status(info_hash).await.unwrap();
    assert_eq!(status.uploaded, PRODUCERS * APPENDS * DELTA);
    assert_eq!(status.downloaded, PRODUCERS * APPENDS * DELTA * 2);
    assert_eq!(fixture.counters.uploaded(), status.uploaded);
    assert!(fixture.buffer.is_empty());

    assert_ok!(fixture.finish().await);
}

#[tokio::test(start_paused = true)]
async fn test_transfer_lifecycle_to_seeding() {
    let mut fixture = AggregatorFixture::start(&StatusConfig::default()).await;
    let seed = InfoHash::digest("already seeding");
    let leech = InfoHash::digest("still leeching");
    let (notifier, mut signals) = mpsc::unbounded_channel();

    let handle = fixture.handle().clone();
    handle
        .insert_transfer(seed, 0, mpsc::unbounded_channel().0)
        .unwrap();
    handle.insert_transfer(leech, 100, notifier).unwrap();
    handle.tracker_stat(leech, Some(4), Some(9)).unwrap();

    assert_eq!(handle.status(seed).await.unwrap().state, TransferState::Seeding);
    let status = handle.status(leech).await.unwrap();
    assert_eq!(status.state, TransferState::Leeching);
    assert_eq!((status.incomplete, status.complete), (Some(4), Some(9)));

    for _ in 0..4 {
        fixture.buffer.record_downloaded(leech, 25);
        handle.completed_piece(leech, 25).unwrap();
    }
    let update = fixture.next_tick().await;
    assert_eq!(update.transfers, 2);

    handle.torrent_completed(leech).unwrap();
    let status = handle.status(leech).await.unwrap();
    assert_eq!(status.left, 0);
    assert_eq!(status.downloaded, 100);
    assert!(status.is_seeding());

    assert_eq!(
        signals.recv().await,
        Some(TrackerSignal::Completed { info_hash: leech })
    );
    assert_err!(signals.try_recv());

    let all = handle.all_transfers().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.values().all(|status| status.is_seeding()));

    assert_ok!(fixture.finish().await);
}

#[tokio::test(start_paused = true)]
async fn test_draining_empty_buffer_changes_nothing() {
    let mut fixture = AggregatorFixture::start(&StatusConfig::default()).await;
    let info_hash = InfoHash::digest("idle");
    fixture
        .handle()
        .insert_transfer(info_hash, 10, mpsc::unbounded_channel().0)
        .unwrap();

    let before = fixture.handle().status(info_hash).await.unwrap();
    for _ in 0..2 {
        assert_eq!(fixture.next_tick().await.drained, 0);
    }
    let after = fixture.handle().status(info_hash).await.unwrap();
    assert_eq!(before, after);

    assert_ok!(fixture.finish().await);
}

#[tokio::test(start_paused = true)]
async fn test_supervised_run_persists_and_resumes_counters() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("counters");
    let info_hash = InfoHash::digest("persisted");

    let mut config = StatusConfig::for_testing().with_snapshot_path(&path);
    config.persistence.resume_from_snapshot = true;

    for round in 1..=2u64 {
        let buffer = DeltaBuffer::new();
        let supervisor = Supervisor::spawn(config.clone(), buffer.clone()).unwrap();
        let handle = supervisor.handle();
        handle
            .insert_transfer(info_hash, 10, mpsc::unbounded_channel().0)
            .unwrap();

        let mut updates = handle.subscribe_stats().await.unwrap();
        buffer.record(info_hash, 100, 10);
        updates.recv().await.unwrap();

        assert_ok!(supervisor.shutdown().await);
        let snapshot = CountersSnapshot::read_from(&path).unwrap().unwrap();
        assert_eq!(snapshot.uploaded, 100 * round);
        assert_eq!(snapshot.downloaded, 10 * round);
        assert_eq!(snapshot.version, env!("CARGO_PKG_VERSION"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_replaces_failed_aggregator() {
    let mut config = StatusConfig::for_testing();
    config.supervisor.restart_policy = RestartPolicy::OnFailure { max_restarts: 1 };

    let supervisor = Supervisor::spawn(config, DeltaBuffer::new()).unwrap();
    let mut watch = supervisor.watch_handle();
    let failed = supervisor.handle();
    let info_hash = InfoHash::digest("unfinished");

    failed
        .insert_transfer(info_hash, 5, mpsc::unbounded_channel().0)
        .unwrap();
    failed.torrent_completed(info_hash).unwrap();

    watch.changed().await.unwrap();
    let replacement = supervisor.handle();
    assert_eq!(supervisor.restarts(), 1);
    assert_err!(failed.all_transfers().await);
    assert!(replacement.all_transfers().await.unwrap().is_empty());

    assert_ok!(supervisor.shutdown().await);
}
