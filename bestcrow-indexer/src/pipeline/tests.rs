// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

use super::*;
use crate::events::test_logs;
use crate::status::{project_status, EscrowStatus};
use crate::store::InMemoryEscrowStore;
use crate::types::{EscrowKey, LogPosition};

/// Serves a fixed set of logs. Can fail or stall the first calls.
#[derive(Default)]
struct MockLogSource {
    logs: Mutex<Vec<ChainLog>>,
    latest: AtomicU64,
    failures: AtomicUsize,
    stalls: AtomicUsize,
    ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockLogSource {
    fn new(latest: u64, logs: Vec<ChainLog>) -> Self {
        Self {
            logs: Mutex::new(logs),
            latest: AtomicU64::new(latest),
            ..Default::default()
        }
    }

    fn push(&self, log: ChainLog) {
        self.logs.lock().unwrap().push(log);
    }

    fn ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().unwrap().clone()
    }

    async fn interfere(&self) -> Result<(), SourceError> {
        if self
            .stalls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SourceError::Rpc("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogSource for MockLogSource {
    async fn latest_block(&self) -> Result<u64, SourceError> {
        self.interfere().await?;
        Ok(self.latest.load(Ordering::SeqCst))
    }

    async fn fetch_logs(
        &self,
        contract: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainLog>, SourceError> {
        self.interfere().await?;
        self.ranges.lock().unwrap().push((from, to));
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.address == contract)
            .filter(|log| (from..=to).contains(&log.block_number))
            .cloned()
            .collect())
    }
}

fn scope() -> ChainScope {
    ChainScope::new(17000, Address::repeat_byte(0x77))
}

fn depositor() -> Address {
    Address::repeat_byte(0xd0)
}

fn receiver() -> Address {
    Address::repeat_byte(0xe0)
}

fn tx(n: u8) -> H256 {
    H256::repeat_byte(n)
}

fn pos(block: u64, index: u64) -> LogPosition {
    LogPosition::new(block, index)
}

fn config(scope: ChainScope, start_block: u64) -> PipelineConfig {
    PipelineConfig {
        name: Some(format!("test-{}", scope.chain_id)),
        chain_id: scope.chain_id,
        rpc_url: "http://localhost:8545".into(),
        contract_address: scope.contract,
        start_block,
        max_block_range: 10,
        poll_interval_ms: 10,
        reconnect_timeout_ms: 200,
        max_retry_secs: 10,
        confirmations: 0,
    }
}

/// Full lifecycle of escrow 1 in blocks 100..=103.
fn lifecycle(scope: ChainScope) -> Vec<ChainLog> {
    let amount = U256::exp10(18);
    vec![
        test_logs::created(
            scope,
            tx(1),
            pos(100, 0),
            1,
            depositor(),
            receiver(),
            amount,
            1_700_000_000,
            "Logo design",
        ),
        test_logs::accepted(scope, tx(2), pos(101, 0), 1, receiver()),
        test_logs::release_requested(scope, tx(3), pos(102, 4), 1),
        test_logs::completed(scope, tx(4), pos(103, 2), 1, receiver(), amount),
    ]
}

struct Harness {
    source: Arc<MockLogSource>,
    store: Arc<InMemoryEscrowStore>,
    metrics: Arc<IndexerMetrics>,
    feed: UpdateFeed,
}

impl Harness {
    fn new(source: MockLogSource) -> Self {
        Self {
            source: Arc::new(source),
            store: Arc::new(InMemoryEscrowStore::new()),
            metrics: Arc::new(IndexerMetrics::new_for_testing()),
            feed: UpdateFeed::default(),
        }
    }

    fn pipeline(&self, config: PipelineConfig) -> IngestionPipeline {
        IngestionPipeline::new(
            config,
            self.source.clone(),
            self.store.clone(),
            self.metrics.clone(),
            self.feed.clone(),
        )
    }

    async fn drain(&self, pipeline: &IngestionPipeline) {
        let cancel = CancellationToken::new();
        while pipeline.sync_once(&cancel).await.unwrap() == Progress::MoreBlocks {}
    }

    fn counter(&self, counter: &prometheus::IntCounterVec, labels: &[&str]) -> u64 {
        counter.with_label_values(labels).get()
    }
}

#[tokio::test]
async fn test_lifecycle_reaches_completed() {
    let harness = Harness::new(MockLogSource::new(120, lifecycle(scope())));
    let mut updates = harness.feed.subscribe();
    let pipeline = harness.pipeline(config(scope(), 100));
    harness.drain(&pipeline).await;

    let record = harness
        .store
        .get(&EscrowKey::new(scope(), 1))
        .await
        .unwrap()
        .unwrap();
    assert!(record.flags.is_completed);
    assert!(record.flags.release_requested);
    assert!(!record.flags.is_active);
    assert_eq!(record.last_position, pos(103, 2));
    assert_eq!(
        project_status(record.flags, record.expiry_date, u64::MAX),
        EscrowStatus::Completed
    );

    // 100-109, 110-119, 120-120
    assert_eq!(
        harness.source.ranges(),
        vec![(100, 109), (110, 119), (120, 120)]
    );
    assert_eq!(
        harness.store.checkpoint(scope()).await.unwrap(),
        Some(Checkpoint::end_of_block(120))
    );
    assert_eq!(
        harness
            .metrics
            .checkpoint_block
            .with_label_values(&["test-17000"])
            .get(),
        120
    );

    let mut kinds = vec![];
    while let Ok(update) = updates.try_recv() {
        kinds.push(update.kind.as_str());
    }
    assert_eq!(
        kinds,
        vec!["created", "accepted", "release_requested", "completed"]
    );
}

#[tokio::test]
async fn test_redelivered_event_is_absorbed() {
    let mut logs = lifecycle(scope());
    // Same transaction delivered again further down the range.
    let mut redelivered = logs[1].clone();
    redelivered.block_number = 105;
    logs.push(redelivered);

    let harness = Harness::new(MockLogSource::new(110, logs));
    let pipeline = harness.pipeline(config(scope(), 100));
    harness.drain(&pipeline).await;

    let record = harness
        .store
        .get(&EscrowKey::new(scope(), 1))
        .await
        .unwrap()
        .unwrap();
    assert!(record.flags.is_completed);
    assert_eq!(record.last_position, pos(103, 2));
    assert_eq!(harness.store.events(scope()).await.unwrap().len(), 4);
    assert_eq!(
        harness.counter(&harness.metrics.events_duplicate, &["17000"]),
        1
    );
}

#[tokio::test]
async fn test_undecodable_log_is_skipped() {
    let mut logs = lifecycle(scope());
    logs.insert(
        1,
        ChainLog {
            address: scope().contract,
            block_number: 100,
            log_index: 1,
            tx_hash: tx(9),
            topics: vec![H256::repeat_byte(0xab)],
            data: Bytes::default(),
        },
    );
    let harness = Harness::new(MockLogSource::new(110, logs));
    harness.drain(&harness.pipeline(config(scope(), 100))).await;

    let record = harness
        .store
        .get(&EscrowKey::new(scope(), 1))
        .await
        .unwrap()
        .unwrap();
    assert!(record.flags.is_completed);
    assert_eq!(
        harness.counter(&harness.metrics.decode_errors, &["17000", "unknown_topic"]),
        1
    );
    assert_eq!(harness.store.events(scope()).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_event_before_creation_is_not_projected() {
    let logs = vec![
        test_logs::accepted(scope(), tx(1), pos(100, 0), 7, receiver()),
        test_logs::created(
            scope(),
            tx(2),
            pos(101, 0),
            7,
            depositor(),
            receiver(),
            U256::from(1_000u64),
            1_700_000_000,
            "Late",
        ),
    ];
    let harness = Harness::new(MockLogSource::new(105, logs));
    harness.drain(&harness.pipeline(config(scope(), 100))).await;

    let record = harness
        .store
        .get(&EscrowKey::new(scope(), 7))
        .await
        .unwrap()
        .unwrap();
    // Only the Created event shaped the record.
    assert!(!record.flags.is_active);
    assert_eq!(record.last_position, pos(101, 0));
    assert_eq!(
        harness.counter(&harness.metrics.orphaned_events, &["17000", "accepted"]),
        1
    );
    // The orphan is still part of the log.
    assert_eq!(harness.store.events(scope()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_scopes_progress_independently() {
    let other = ChainScope::new(17000, Address::repeat_byte(0x88));
    let mut logs = lifecycle(scope());
    // Same escrow id and same tx hash in another deployment.
    logs.push(test_logs::created(
        other,
        tx(1),
        pos(100, 1),
        1,
        depositor(),
        receiver(),
        U256::from(5u64),
        1_700_000_000,
        "Other deployment",
    ));
    let harness = Harness::new(MockLogSource::new(110, logs));
    harness.drain(&harness.pipeline(config(scope(), 100))).await;
    harness.drain(&harness.pipeline(config(other, 100))).await;

    let first = harness
        .store
        .get(&EscrowKey::new(scope(), 1))
        .await
        .unwrap()
        .unwrap();
    let second = harness
        .store
        .get(&EscrowKey::new(other, 1))
        .await
        .unwrap()
        .unwrap();
    assert!(first.flags.is_completed);
    assert_eq!(second.title, "Other deployment");
    assert_eq!(second.flags, Default::default());
    // The shared tx hash did not collide across deployments.
    assert_eq!(
        harness.counter(&harness.metrics.events_duplicate, &["17000"]),
        0
    );
    assert_eq!(harness.store.events(scope()).await.unwrap().len(), 4);
    assert_eq!(harness.store.events(other).await.unwrap().len(), 1);

    let mut checkpoints = harness.store.checkpoints().await.unwrap();
    checkpoints.sort();
    assert_eq!(
        checkpoints,
        vec![
            (scope(), Checkpoint::end_of_block(110)),
            (other, Checkpoint::end_of_block(110)),
        ]
    );
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let source = MockLogSource::new(110, lifecycle(scope()));
    source.failures.store(2, Ordering::SeqCst);
    let harness = Harness::new(source);
    harness.drain(&harness.pipeline(config(scope(), 100))).await;

    assert!(harness
        .store
        .get(&EscrowKey::new(scope(), 1))
        .await
        .unwrap()
        .unwrap()
        .flags
        .is_completed);
}

#[tokio::test]
async fn test_stalled_call_times_out_and_reconnects() {
    let source = MockLogSource::new(110, lifecycle(scope()));
    source.stalls.store(1, Ordering::SeqCst);
    let harness = Harness::new(source);
    let pipeline = harness.pipeline(config(scope(), 100));

    tokio::time::timeout(Duration::from_secs(10), harness.drain(&pipeline))
        .await
        .unwrap();
    assert_eq!(harness.store.events(scope()).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_exhausted_retries_surface_error() {
    let source = MockLogSource::new(110, lifecycle(scope()));
    source.failures.store(usize::MAX, Ordering::SeqCst);
    let harness = Harness::new(source);
    let mut config = config(scope(), 100);
    config.max_retry_secs = 1;
    let pipeline = harness.pipeline(config);

    assert!(pipeline
        .sync_once(&CancellationToken::new())
        .await
        .is_err());
    assert_eq!(
        harness.counter(&harness.metrics.source_errors, &["17000", "rpc"]),
        1
    );
    assert_eq!(harness.store.checkpoint(scope()).await.unwrap(), None);
}

#[tokio::test]
async fn test_resume_from_checkpoint() {
    let mut logs = lifecycle(scope());
    let later = logs.split_off(2);
    let harness = Harness::new(MockLogSource::new(101, logs));
    harness.drain(&harness.pipeline(config(scope(), 100))).await;
    assert_eq!(
        harness.store.checkpoint(scope()).await.unwrap(),
        Some(Checkpoint::end_of_block(101))
    );

    for log in later {
        harness.source.push(log);
    }
    harness.source.latest.store(103, Ordering::SeqCst);
    // A restarted pipeline with the same start block picks up after the checkpoint.
    harness.drain(&harness.pipeline(config(scope(), 100))).await;

    assert_eq!(harness.source.ranges(), vec![(100, 101), (102, 103)]);
    assert!(harness
        .store
        .get(&EscrowKey::new(scope(), 1))
        .await
        .unwrap()
        .unwrap()
        .flags
        .is_completed);
    assert_eq!(
        harness.counter(&harness.metrics.events_duplicate, &["17000"]),
        0
    );
}

#[tokio::test]
async fn test_resume_within_block_skips_covered_entries() {
    let logs = lifecycle(scope());
    let harness = Harness::new(MockLogSource::new(103, logs));
    let decoder = EventDecoder::new(scope());
    // Crash after the first entry of block 100.
    let created = decoder.decode(&harness.source.logs.lock().unwrap()[0]).unwrap();
    harness.store.ingest(&created).await.unwrap();

    harness.drain(&harness.pipeline(config(scope(), 100))).await;

    assert_eq!(harness.source.ranges(), vec![(100, 103)]);
    assert_eq!(
        harness.counter(&harness.metrics.events_duplicate, &["17000"]),
        0
    );
    assert_eq!(harness.store.events(scope()).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_unsorted_logs_are_applied_in_chain_order() {
    let mut logs = lifecycle(scope());
    logs.reverse();
    let harness = Harness::new(MockLogSource::new(103, logs));
    harness.drain(&harness.pipeline(config(scope(), 100))).await;

    let record = harness
        .store
        .get(&EscrowKey::new(scope(), 1))
        .await
        .unwrap()
        .unwrap();
    assert!(record.flags.is_completed);
    assert_eq!(
        harness.counter(&harness.metrics.orphaned_events, &["17000", "accepted"]),
        0
    );
}

#[tokio::test]
async fn test_confirmations_hold_back_recent_blocks() {
    let harness = Harness::new(MockLogSource::new(105, lifecycle(scope())));
    let mut config = config(scope(), 100);
    config.confirmations = 3;
    harness.drain(&harness.pipeline(config)).await;

    // Head is 102, so the Completed event in block 103 is not ingested yet.
    let record = harness
        .store
        .get(&EscrowKey::new(scope(), 1))
        .await
        .unwrap()
        .unwrap();
    assert!(record.flags.release_requested);
    assert!(!record.flags.is_completed);
    assert_eq!(
        harness.store.checkpoint(scope()).await.unwrap(),
        Some(Checkpoint::end_of_block(102))
    );
}

#[tokio::test]
async fn test_cancelled_pipeline_stops_between_entries() {
    let harness = Harness::new(MockLogSource::new(103, lifecycle(scope())));
    let pipeline = harness.pipeline(config(scope(), 100));
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(
        pipeline.sync_once(&cancel).await.unwrap(),
        Progress::Cancelled
    );
    assert!(harness.store.events(scope()).await.unwrap().is_empty());
    assert_eq!(harness.store.checkpoint(scope()).await.unwrap(), None);

    // `run` returns promptly once cancelled.
    tokio::time::timeout(Duration::from_secs(1), pipeline.run(cancel))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_run_pipelines_until_cancelled() {
    let harness = Harness::new(MockLogSource::new(103, lifecycle(scope())));
    let cancel = CancellationToken::new();
    let mut updates = harness.feed.subscribe();
    let handles = run_pipelines(vec![harness.pipeline(config(scope(), 100))], cancel.clone());

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = updates.recv().await.unwrap();
            if update.kind.as_str() == "completed" {
                break;
            }
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    for handle in futures::future::join_all(handles).await {
        handle.unwrap();
    }
}
