//! The aggregation service: periodic catch-up over the source queues.

use std::sync::Arc;

use clusterwatch_store::{Membership, QueueStore};
use clusterwatch_types::CLUSTER_DATA_KEY;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::collate::{BuildOutcome, Collator};
use crate::config::AggregatorConfig;
use crate::error::AggregateError;
use crate::retention::Retention;
use crate::shutdown::{Shutdown, ShutdownTrigger};

/// Owns the source queues' consumer side and the snapshot history.
///
/// Cloning is cheap; every clone drives the same queues and shares one
/// shutdown signal.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use clusterwatch_aggregator::Aggregator;
/// use clusterwatch_store::{DiscoveredMembership, MemoryStore, QueueStore};
///
/// #[tokio::main]
/// async fn main() {
///     let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
///     let membership = Arc::new(DiscoveredMembership::new(store.clone()));
///
///     let aggregator = Aggregator::builder(store, membership)
///         .interval(Duration::from_secs(10))
///         .capacity(8640)
///         .build();
///
///     let handle = aggregator.start();
///
///     // ... producers push samples through the TelemetryApi ...
///
///     handle.shutdown().await;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    store: Arc<dyn QueueStore>,
    membership: Arc<dyn Membership>,
    config: AggregatorConfig,
    collator: Collator,
    retention: Retention,
    // Serializes catch-up passes; the collator must be the only consumer.
    catch_up: Mutex<()>,
    trigger: ShutdownTrigger,
}

/// Work done by one [`Aggregator::catch_up`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Snapshot attempts made.
    pub attempts: usize,
    /// Snapshots appended.
    pub built: usize,
    /// Source items dropped as unmatchable or undecodable.
    pub discarded: usize,
    /// Snapshots evicted by retention.
    pub evicted: usize,
}

impl Aggregator {
    /// Create an aggregator with default settings.
    pub fn new(store: Arc<dyn QueueStore>, membership: Arc<dyn Membership>) -> Self {
        Self::builder(store, membership).build()
    }

    /// Create a builder for configuring the aggregator.
    pub fn builder(
        store: Arc<dyn QueueStore>,
        membership: Arc<dyn Membership>,
    ) -> AggregatorBuilder {
        AggregatorBuilder::new(store, membership)
    }

    /// The effective configuration.
    pub fn config(&self) -> &AggregatorConfig {
        &self.inner.config
    }

    /// The backing queue store.
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.inner.store
    }

    /// A receiver for this aggregator's shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.inner.trigger.subscribe()
    }

    /// Stop the loop, abort in-flight retries and refuse further catch-up.
    pub fn shutdown(&self) {
        self.inner.trigger.trigger();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.trigger.is_triggered()
    }

    /// Smallest item count across every member node queue and the
    /// cluster-data queue.
    ///
    /// Zero when there are no members. A queue whose count cannot be read
    /// counts as empty.
    pub async fn min_backlog(&self) -> usize {
        let nodes = match self.inner.membership.nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Failed to list members");
                return 0;
            }
        };
        if nodes.is_empty() {
            return 0;
        }

        let mut min = usize::MAX;
        let keys = nodes
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(CLUSTER_DATA_KEY));
        for key in keys {
            let count = match self.inner.store.count(key).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(queue = key, error = %e, "Failed to count queue");
                    0
                }
            };
            min = min.min(count);
            if min <= 1 {
                break;
            }
        }
        min
    }

    /// Build snapshots while every source queue holds more than one item.
    ///
    /// Each attempt is followed by a retention pass. The pass stops early
    /// when an attempt changes nothing or fails; failures are logged and
    /// retried on the next pass. Only cancellation is returned as an error.
    pub async fn catch_up(&self) -> Result<CatchUpReport, AggregateError> {
        let _guard = self.inner.catch_up.lock().await;
        let mut shutdown = self.shutdown_signal();
        let mut report = CatchUpReport::default();

        loop {
            if shutdown.is_triggered() {
                return Err(AggregateError::Cancelled);
            }
            if self.min_backlog().await <= 1 {
                break;
            }

            report.attempts += 1;
            let result = self.inner.collator.try_build(&mut shutdown).await;
            report.evicted += self.prune().await;

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Snapshot attempt failed");
                    break;
                }
            };

            match &outcome {
                BuildOutcome::Built(_) => report.built += 1,
                BuildOutcome::Skipped { reason, discarded } => {
                    report.discarded += discarded;
                    debug!(%reason, discarded, "Snapshot attempt skipped");
                }
                BuildOutcome::Empty => {}
            }

            if !outcome.made_progress() {
                break;
            }
        }

        Ok(report)
    }

    async fn prune(&self) -> usize {
        match self.inner.retention.prune().await {
            Ok(evicted) => evicted,
            Err(e) => {
                warn!(error = %e, "Retention pass failed");
                0
            }
        }
    }

    /// Run the aggregation loop in the current task until shutdown.
    ///
    /// The first pass happens one interval after the call.
    pub async fn run(&self) {
        let config = &self.inner.config;
        let mut shutdown = self.shutdown_signal();
        let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = config.interval.as_millis() as u64,
            window_ms = config.window_ms(),
            capacity = config.capacity,
            "Aggregation loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.triggered() => break,
            }

            match self.catch_up().await {
                Ok(report) if report.attempts > 0 => {
                    debug!(
                        attempts = report.attempts,
                        built = report.built,
                        discarded = report.discarded,
                        evicted = report.evicted,
                        "Catch-up pass finished"
                    );
                }
                Ok(_) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(error = %e, "Catch-up pass failed"),
            }
        }

        info!("Aggregation loop stopped");
    }

    /// Spawn the aggregation loop on the tokio runtime.
    pub fn start(&self) -> AggregationHandle {
        let aggregator = self.clone();
        let task = tokio::spawn(async move { aggregator.run().await });
        AggregationHandle {
            aggregator: self.clone(),
            task,
        }
    }
}

/// Builder for configuring an Aggregator.
#[derive(Debug)]
pub struct AggregatorBuilder {
    store: Arc<dyn QueueStore>,
    membership: Arc<dyn Membership>,
    config: crate::config::AggregatorConfigBuilder,
}

impl AggregatorBuilder {
    /// Create a new builder.
    pub fn new(store: Arc<dyn QueueStore>, membership: Arc<dyn Membership>) -> Self {
        Self {
            store,
            membership,
            config: AggregatorConfig::builder(),
        }
    }

    /// Use a complete configuration, replacing earlier settings.
    pub fn config(mut self, config: AggregatorConfig) -> Self {
        self.config = AggregatorConfig::builder()
            .interval(config.interval)
            .capacity(config.capacity)
            .window(config.window)
            .retry(config.retry);
        self
    }

    /// Set the loop interval. Defaults to 10 seconds.
    pub fn interval(mut self, interval: std::time::Duration) -> Self {
        self.config = self.config.interval(interval);
        self
    }

    /// Set the snapshot retention capacity. Defaults to 8640.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.capacity(capacity);
        self
    }

    /// Set the alignment window. Defaults to the interval.
    pub fn window(mut self, window: std::time::Duration) -> Self {
        self.config = self.config.window(window);
        self
    }

    /// Set the retry policy for queue creation and snapshot appends.
    pub fn retry(mut self, retry: crate::retry::RetryPolicy) -> Self {
        self.config = self.config.retry(retry);
        self
    }

    /// Build the aggregator.
    pub fn build(self) -> Aggregator {
        let config = self.config.build();
        let collator = Collator::new(
            self.store.clone(),
            self.membership.clone(),
            config.window_ms(),
            config.retry,
        );
        let retention = Retention::new(self.store.clone(), config.capacity);
        let (trigger, _) = Shutdown::channel();

        Aggregator {
            inner: Arc::new(Inner {
                store: self.store,
                membership: self.membership,
                config,
                collator,
                retention,
                catch_up: Mutex::new(()),
                trigger,
            }),
        }
    }
}

/// Handle for a spawned aggregation loop.
///
/// Dropping the handle detaches the loop; it keeps running until the
/// aggregator is shut down.
#[derive(Debug)]
pub struct AggregationHandle {
    aggregator: Aggregator,
    task: JoinHandle<()>,
}

impl AggregationHandle {
    /// Signal the loop to stop.
    pub fn stop(&self) {
        self.aggregator.shutdown();
    }

    /// Wait for the loop task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "Aggregation task ended abnormally");
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        self.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use clusterwatch_store::{MemoryStore, StaticMembership};
    use clusterwatch_types::{ClusterData, NodeData, SNAPSHOT_KEY};
    use std::time::Duration;

    fn setup(nodes: &[&str]) -> (Arc<MemoryStore>, Aggregator) {
        let store = Arc::new(MemoryStore::new());
        let members = Arc::new(StaticMembership::new(nodes.iter().copied()));
        let aggregator = Aggregator::builder(store.clone(), members)
            .interval(Duration::from_millis(100))
            .window(Duration::from_millis(50))
            .capacity(10)
            .build();
        (store, aggregator)
    }

    async fn push_round(store: &MemoryStore, nodes: &[&str], ts: u64) {
        store
            .enqueue(CLUSTER_DATA_KEY, codec::encode(&ClusterData::new(ts)).unwrap())
            .await
            .unwrap();
        for node in nodes {
            store
                .enqueue(node, codec::encode(&NodeData::new(*node, ts)).unwrap())
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_builder_defaults() {
        let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
        let members = Arc::new(StaticMembership::default());
        let aggregator = Aggregator::new(store, members);

        assert_eq!(aggregator.config(), &AggregatorConfig::default());
        assert!(!aggregator.is_shutdown());
    }

    #[test]
    fn test_builder_config_replaces_settings() {
        let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
        let members = Arc::new(StaticMembership::default());
        let config = AggregatorConfig::builder()
            .interval(Duration::from_secs(1))
            .capacity(5)
            .build();

        let aggregator = Aggregator::builder(store, members)
            .capacity(99)
            .config(config.clone())
            .build();
        assert_eq!(aggregator.config(), &config);
    }

    #[tokio::test]
    async fn test_min_backlog() {
        let (store, aggregator) = setup(&["n1", "n2"]);
        assert_eq!(aggregator.min_backlog().await, 0);

        push_round(&store, &["n1", "n2"], 100).await;
        push_round(&store, &["n1", "n2"], 200).await;
        push_round(&store, &["n1"], 300).await;
        assert_eq!(aggregator.min_backlog().await, 2);
    }

    #[tokio::test]
    async fn test_min_backlog_without_members() {
        let (store, aggregator) = setup(&[]);
        push_round(&store, &[], 100).await;
        push_round(&store, &[], 200).await;
        assert_eq!(aggregator.min_backlog().await, 0);
    }

    #[tokio::test]
    async fn test_catch_up_leaves_newest_round() {
        let nodes = ["n1", "n2"];
        let (store, aggregator) = setup(&nodes);
        for ts in [100, 200, 300, 400] {
            push_round(&store, &nodes, ts).await;
        }

        let report = aggregator.catch_up().await.unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(report.built, 3);
        assert_eq!(store.count(SNAPSHOT_KEY).await.unwrap(), 3);
        for key in ["n1", "n2", CLUSTER_DATA_KEY] {
            assert_eq!(store.count(key).await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_catch_up_stops_without_progress() {
        let (store, aggregator) = setup(&["n1"]);
        // Plenty of node data but no cluster data at all
        for ts in [100, 200, 300] {
            store
                .enqueue("n1", codec::encode(&NodeData::new("n1", ts)).unwrap())
                .await
                .unwrap();
        }
        let report = aggregator.catch_up().await.unwrap();
        assert_eq!(report.attempts, 0);

        // Cluster data too, but far behind: every attempt makes progress
        // until the gate closes
        push_round(&store, &[], 10).await;
        push_round(&store, &[], 20).await;
        let report = aggregator.catch_up().await.unwrap();
        assert!(report.attempts >= 1);
        assert!(report.discarded >= 1);
    }

    #[tokio::test]
    async fn test_catch_up_after_shutdown_is_cancelled() {
        let nodes = ["n1"];
        let (store, aggregator) = setup(&nodes);
        push_round(&store, &nodes, 100).await;
        push_round(&store, &nodes, 200).await;

        aggregator.shutdown();
        assert!(aggregator.catch_up().await.unwrap_err().is_cancelled());
        assert_eq!(store.count(SNAPSHOT_KEY).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retention_runs_with_each_attempt() {
        let nodes = ["n1"];
        let (store, aggregator) = setup(&nodes);
        for ts in 0..15u64 {
            push_round(&store, &nodes, ts * 100).await;
        }

        let report = aggregator.catch_up().await.unwrap();
        assert_eq!(report.built, 14);
        assert_eq!(report.evicted, 4);
        assert_eq!(store.count(SNAPSHOT_KEY).await.unwrap(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let nodes = ["n1"];
        let (store, aggregator) = setup(&nodes);
        push_round(&store, &nodes, 100).await;
        push_round(&store, &nodes, 200).await;

        let handle = aggregator.start();

        // Nothing happens before the first tick
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.count(SNAPSHOT_KEY).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.count(SNAPSHOT_KEY).await.unwrap(), 1);

        handle.shutdown().await;
        assert!(aggregator.is_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_keeps_up_with_producers() {
        let nodes = ["n1", "n2"];
        let (store, aggregator) = setup(&nodes);
        let handle = aggregator.start();

        for round in 1..=5u64 {
            push_round(&store, &nodes, round * 100).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.shutdown().await;

        // The newest round always waits for its successor
        assert_eq!(store.count(SNAPSHOT_KEY).await.unwrap(), 4);
    }
}
