//! End-to-end behavior of the aggregation engine over an in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clusterwatch_aggregator::{
    codec, within_window, AggregateError, Aggregator, ApiError, BuildOutcome, Collator,
    RetryPolicy, Shutdown, SkipReason, TelemetryApi,
};
use clusterwatch_store::{
    DiscoveredMembership, MemoryStore, QueueStore, StaticMembership, StoreError,
};
use clusterwatch_types::{ClusterData, NodeData, Snapshot, CLUSTER_DATA_KEY, SNAPSHOT_KEY};

fn cluster(ts: u64) -> Vec<u8> {
    codec::encode(&ClusterData::new(ts)).unwrap()
}

fn node(name: &str, ts: u64) -> Vec<u8> {
    codec::encode(&NodeData::new(name, ts)).unwrap()
}

fn collator(store: Arc<dyn QueueStore>, nodes: &[&str], window_ms: u64) -> Collator {
    let members = Arc::new(StaticMembership::new(nodes.iter().copied()));
    Collator::new(store, members, window_ms, RetryPolicy::none())
}

/// Wraps a store and fails selected operations a fixed number of times.
#[derive(Debug)]
struct FlakyStore {
    inner: MemoryStore,
    open_failures: AtomicUsize,
    enqueue_failures: AtomicUsize,
    dequeues: AtomicUsize,
}

impl FlakyStore {
    fn new(open_failures: usize, enqueue_failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            open_failures: AtomicUsize::new(open_failures),
            enqueue_failures: AtomicUsize::new(enqueue_failures),
            dequeues: AtomicUsize::new(0),
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn open(&self, key: &str) -> Result<(), StoreError> {
        if Self::take_failure(&self.open_failures) {
            return Err(StoreError::Unavailable("open".into()));
        }
        self.inner.open(key).await
    }

    async fn enqueue(&self, key: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        if Self::take_failure(&self.enqueue_failures) {
            return Err(StoreError::Aborted {
                queue: key.to_string(),
                reason: "conflict".into(),
            });
        }
        self.inner.enqueue(key, payload).await
    }

    async fn try_peek(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.try_peek(key).await
    }

    async fn try_dequeue(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.dequeues.fetch_add(1, Ordering::SeqCst);
        self.inner.try_dequeue(key).await
    }

    async fn count(&self, key: &str) -> Result<usize, StoreError> {
        self.inner.count(key).await
    }

    async fn items(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        self.inner.items(key).await
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.inner.clear(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys().await
    }

    async fn idle_for(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.inner.idle_for(key).await
    }
}

#[tokio::test]
async fn scenario_a_partial_alignment() {
    let store = Arc::new(MemoryStore::new());
    store.enqueue(CLUSTER_DATA_KEY, cluster(100)).await.unwrap();
    store.enqueue(CLUSTER_DATA_KEY, cluster(200)).await.unwrap();
    store.enqueue("n1", node("n1", 110)).await.unwrap();
    store.enqueue("n2", node("n2", 150)).await.unwrap();

    let outcome = collator(store.clone(), &["n1", "n2"], 50)
        .try_build(&mut Shutdown::never())
        .await
        .unwrap();

    let snapshot = outcome.snapshot().unwrap();
    assert_eq!(snapshot.timestamp_ms, 100);
    assert_eq!(snapshot.cluster.timestamp_ms, 100);
    assert_eq!(snapshot.nodes, vec![NodeData::new("n1", 110)]);

    assert_eq!(store.items("n2").await.unwrap(), vec![node("n2", 150)]);
    assert_eq!(store.items(CLUSTER_DATA_KEY).await.unwrap(), vec![cluster(200)]);
    assert_eq!(store.count("n1").await.unwrap(), 0);
}

#[tokio::test]
async fn scenario_b_no_cluster_data() {
    let store = Arc::new(MemoryStore::new());
    store.enqueue("n1", node("n1", 100)).await.unwrap();
    store.enqueue("n2", node("n2", 100)).await.unwrap();

    let outcome = collator(store.clone(), &["n1", "n2"], 50)
        .try_build(&mut Shutdown::never())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        BuildOutcome::Skipped {
            reason: SkipReason::NoClusterData,
            discarded: 0
        }
    );
    assert_eq!(store.count("n1").await.unwrap(), 1);
    assert_eq!(store.count("n2").await.unwrap(), 1);
    assert_eq!(store.count(SNAPSHOT_KEY).await.unwrap(), 0);
}

#[tokio::test]
async fn scenario_c_retention_at_capacity() {
    let store = Arc::new(MemoryStore::new());
    let members = Arc::new(StaticMembership::new(["n1"]));
    let aggregator = Aggregator::builder(store.clone(), members)
        .capacity(3)
        .window(Duration::from_millis(50))
        .build();

    for ts in [100, 200, 300, 400] {
        aggregator.put_data(CLUSTER_DATA_KEY, cluster(ts)).await.unwrap();
        aggregator.put_data("n1", node("n1", ts)).await.unwrap();
    }
    aggregator.catch_up().await.unwrap();
    assert_eq!(store.count(SNAPSHOT_KEY).await.unwrap(), 3);

    aggregator.put_data(CLUSTER_DATA_KEY, cluster(500)).await.unwrap();
    aggregator.put_data("n1", node("n1", 500)).await.unwrap();
    let report = aggregator.catch_up().await.unwrap();

    assert_eq!(report.built, 1);
    assert_eq!(report.evicted, 1);
    let stamps: Vec<u64> = aggregator
        .get_snapshots(f64::NEG_INFINITY, f64::INFINITY)
        .await
        .iter()
        .map(|s| s.timestamp_ms)
        .collect();
    assert_eq!(stamps, vec![200, 300, 400]);
}

#[tokio::test]
async fn scenario_d_put_then_get() {
    let store = Arc::new(MemoryStore::new());
    let aggregator = Aggregator::new(store, Arc::new(StaticMembership::default()));

    aggregator.put_data("n1", b"payload".to_vec()).await.unwrap();
    assert_eq!(aggregator.get_data("n1").await, vec![b"payload".to_vec()]);
}

#[tokio::test]
async fn snapshots_are_aligned_and_non_empty() {
    let store = Arc::new(MemoryStore::new());
    let nodes = ["a", "b", "c"];
    let members = Arc::new(StaticMembership::new(nodes));
    let aggregator = Aggregator::builder(store.clone(), members)
        .window(Duration::from_millis(100))
        .capacity(1_000)
        .build();

    // Jittered producers, one node occasionally silent
    for round in 0..50u64 {
        let base = round * 1_000;
        aggregator.put_data(CLUSTER_DATA_KEY, cluster(base + 5)).await.unwrap();
        for (i, name) in nodes.iter().enumerate() {
            if *name == "c" && round % 7 == 3 {
                continue;
            }
            let ts = base + (round * 13 + i as u64 * 31) % 90;
            aggregator.put_data(name, node(name, ts)).await.unwrap();
        }
    }
    aggregator.catch_up().await.unwrap();

    let history = aggregator.get_snapshots(f64::NEG_INFINITY, f64::INFINITY).await;
    assert!(!history.is_empty());
    for snapshot in &history {
        assert!(!snapshot.is_empty());
        let stamps: Vec<u64> = snapshot
            .iter()
            .map(|n| n.timestamp_ms)
            .chain([snapshot.cluster.timestamp_ms])
            .collect();
        assert_eq!(stamps.iter().min().copied(), Some(snapshot.timestamp_ms));
        assert!(stamps
            .iter()
            .all(|ts| within_window(*ts, snapshot.timestamp_ms, 100)));
    }

    let watermarks: Vec<u64> = history.iter().map(|s| s.timestamp_ms).collect();
    let mut sorted = watermarks.clone();
    sorted.sort_unstable();
    assert_eq!(watermarks, sorted);
}

#[tokio::test]
async fn admission_gate_blocks_thin_queues() {
    let store = Arc::new(FlakyStore::new(0, 0));
    let members = Arc::new(StaticMembership::new(["n1", "n2"]));
    let aggregator = Aggregator::new(store.clone(), members);

    for ts in [100, 200, 300] {
        store.enqueue(CLUSTER_DATA_KEY, cluster(ts)).await.unwrap();
        store.enqueue("n1", node("n1", ts)).await.unwrap();
    }
    store.enqueue("n2", node("n2", 100)).await.unwrap();

    assert_eq!(aggregator.min_backlog().await, 1);
    let report = aggregator.catch_up().await.unwrap();

    assert_eq!(report.attempts, 0);
    assert_eq!(store.dequeues.load(Ordering::SeqCst), 0);
    assert_eq!(store.count(SNAPSHOT_KEY).await.unwrap(), 0);
}

#[tokio::test]
async fn range_query_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let members = Arc::new(StaticMembership::new(["n1"]));
    let aggregator = Aggregator::builder(store, members)
        .window(Duration::from_millis(10))
        .build();

    for ts in (0..20u64).map(|i| i * 100) {
        aggregator.put_data(CLUSTER_DATA_KEY, cluster(ts)).await.unwrap();
        aggregator.put_data("n1", node("n1", ts)).await.unwrap();
    }
    aggregator.catch_up().await.unwrap();

    let first = aggregator.get_snapshots(300.0, 1_200.0).await;
    let second = aggregator.get_snapshots(300.0, 1_200.0).await;
    assert_eq!(first.len(), 10);
    assert_eq!(first, second);
}

#[tokio::test]
async fn failed_attempts_do_not_consume_completable_data() {
    let store = Arc::new(FlakyStore::new(0, 0));
    store.enqueue("n1", node("n1", 100)).await.unwrap();
    store.enqueue("n2", node("n2", 120)).await.unwrap();

    let collator = collator(store.clone(), &["n1", "n2"], 50);
    for _ in 0..3 {
        let outcome = collator.try_build(&mut Shutdown::never()).await.unwrap();
        assert!(!outcome.made_progress());
    }
    assert_eq!(store.dequeues.load(Ordering::SeqCst), 0);

    // Cluster data arrives late but within the window: nothing was lost
    store.enqueue(CLUSTER_DATA_KEY, cluster(110)).await.unwrap();
    let snapshot: Snapshot = collator
        .try_build(&mut Shutdown::never())
        .await
        .unwrap()
        .snapshot()
        .cloned()
        .unwrap();
    assert_eq!(snapshot.len(), 2);
}

#[tokio::test]
async fn late_cluster_data_only_drops_unmatchable_heads() {
    let store = Arc::new(FlakyStore::new(0, 0));
    store.enqueue(CLUSTER_DATA_KEY, cluster(160)).await.unwrap();
    store.enqueue("a", node("a", 100)).await.unwrap();
    store.enqueue("b", node("b", 140)).await.unwrap();

    let collator = collator(store.clone(), &["a", "b"], 50);
    let outcome = collator.try_build(&mut Shutdown::never()).await.unwrap();
    assert_eq!(
        outcome,
        BuildOutcome::Skipped {
            reason: SkipReason::ClusterDataOutOfWindow,
            discarded: 1
        }
    );
    assert_eq!(store.dequeues.load(Ordering::SeqCst), 1);
    assert_eq!(store.count("a").await.unwrap(), 0);
    assert_eq!(store.count("b").await.unwrap(), 1);

    // b@140 still pairs with cluster@160
    let snapshot = collator
        .try_build(&mut Shutdown::never())
        .await
        .unwrap()
        .snapshot()
        .cloned()
        .unwrap();
    assert_eq!(snapshot.timestamp_ms, 140);
    assert_eq!(snapshot.nodes, vec![NodeData::new("b", 140)]);
}

#[tokio::test(start_paused = true)]
async fn departed_node_stops_holding_back_aggregation() {
    let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
    let members = Arc::new(
        DiscoveredMembership::new(store.clone()).with_idle_timeout(Some(Duration::from_secs(30))),
    );
    let aggregator = Aggregator::builder(store.clone(), members)
        .window(Duration::from_millis(50))
        .build();

    aggregator.put_data("gone", node("gone", 0)).await.unwrap();
    for ts in [1_000, 2_000, 3_000] {
        tokio::time::advance(Duration::from_secs(5)).await;
        aggregator.put_data(CLUSTER_DATA_KEY, cluster(ts)).await.unwrap();
        aggregator.put_data("live", node("live", ts)).await.unwrap();
    }

    // Still a member with a single queued sample: the gate stays shut
    assert_eq!(aggregator.min_backlog().await, 1);
    assert_eq!(aggregator.catch_up().await.unwrap().attempts, 0);

    tokio::time::advance(Duration::from_secs(20)).await;
    let report = aggregator.catch_up().await.unwrap();
    assert_eq!(report.built, 2);

    let history = aggregator.get_snapshots(f64::NEG_INFINITY, f64::INFINITY).await;
    assert!(history.iter().all(|s| s.get("gone").is_none()));
    assert_eq!(store.count("gone").await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn put_data_retries_transient_failures() {
    let store = Arc::new(FlakyStore::new(2, 2));
    let aggregator = Aggregator::builder(store.clone(), Arc::new(StaticMembership::default()))
        .retry(RetryPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            max_attempts: Some(5),
        })
        .build();

    aggregator.put_data("n1", b"x".to_vec()).await.unwrap();
    assert_eq!(store.items("n1").await.unwrap(), vec![b"x".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn put_data_gives_up_eventually() {
    let store = Arc::new(FlakyStore::new(10, 0));
    let aggregator = Aggregator::builder(store.clone(), Arc::new(StaticMembership::default()))
        .retry(RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        })
        .build();

    let err = aggregator.put_data("n1", b"x".to_vec()).await.unwrap_err();
    assert!(matches!(
        err,
        ApiError::Aggregate(AggregateError::RetriesExhausted { attempts: 3, .. })
    ));
    assert!(store.items("n1").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_append_keeps_source_items() {
    let store = Arc::new(FlakyStore::new(0, 0));
    for ts in [100, 200] {
        store.enqueue(CLUSTER_DATA_KEY, cluster(ts)).await.unwrap();
        store.enqueue("n1", node("n1", ts)).await.unwrap();
    }
    // Every snapshot append from now on fails twice
    store.enqueue_failures.store(2, Ordering::SeqCst);

    let collator = collator(store.clone(), &["n1"], 50);
    let err = collator.try_build(&mut Shutdown::never()).await.unwrap_err();
    assert!(matches!(err, AggregateError::RetriesExhausted { .. }));
    assert_eq!(store.dequeues.load(Ordering::SeqCst), 0);
    assert_eq!(store.count("n1").await.unwrap(), 2);

    // The store recovers; the same round is built
    store.enqueue_failures.store(1, Ordering::SeqCst);
    let members = Arc::new(StaticMembership::new(["n1"]));
    let patient = Collator::new(store.clone(), members, 50, RetryPolicy::default());
    let outcome = patient.try_build(&mut Shutdown::never()).await.unwrap();
    assert_eq!(outcome.snapshot().map(|s| s.timestamp_ms), Some(100));
}

#[tokio::test]
async fn membership_changes_between_attempts() {
    let store = Arc::new(MemoryStore::new());
    let members = Arc::new(StaticMembership::new(["n1"]));
    let aggregator = Aggregator::builder(store.clone(), members.clone())
        .window(Duration::from_millis(50))
        .build();

    for ts in [100, 200, 300] {
        aggregator.put_data(CLUSTER_DATA_KEY, cluster(ts)).await.unwrap();
        aggregator.put_data("n1", node("n1", ts)).await.unwrap();
        aggregator.put_data("n2", node("n2", ts)).await.unwrap();
    }

    let report = aggregator.catch_up().await.unwrap();
    assert_eq!(report.built, 2);

    members.add("n2");
    for ts in [400, 500] {
        aggregator.put_data(CLUSTER_DATA_KEY, cluster(ts)).await.unwrap();
        aggregator.put_data("n1", node("n1", ts)).await.unwrap();
        aggregator.put_data("n2", node("n2", ts)).await.unwrap();
    }
    aggregator.catch_up().await.unwrap();

    let latest = aggregator.get_snapshots(300.0, 400.0).await;
    assert!(latest.iter().any(|s| s.get("n2").is_some() && s.get("n1").is_some()));
}
