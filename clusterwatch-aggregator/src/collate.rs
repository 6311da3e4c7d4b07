//! Snapshot building: align queue heads on a watermark, then commit.
//!
//! An attempt never removes anything while it is still deciding. Heads are
//! peeked, the watermark and candidates are computed, and only a successful
//! attempt appends the snapshot and then dequeues what it merged. This is
//! sound because the collator is the only consumer of source queues;
//! producers only append, so a peeked head is still the head at commit time.

use std::fmt;
use std::sync::Arc;

use clusterwatch_store::{Membership, QueueStore};
use clusterwatch_types::{ClusterData, NodeData, Snapshot, CLUSTER_DATA_KEY, SNAPSHOT_KEY};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::codec;
use crate::error::AggregateError;
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;

/// Returns true if `ts` is current relative to `watermark`:
/// `watermark <= ts < watermark + window_ms`.
pub fn within_window(ts: u64, watermark: u64, window_ms: u64) -> bool {
    ts >= watermark && ts - watermark < window_ms
}

/// Why an attempt did not produce a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The membership source returned no nodes.
    NoMembers,
    /// A queue head could not be decoded and was dropped.
    UndecodableHead,
    /// The cluster-data queue is empty.
    NoClusterData,
    /// The cluster-data head is past the window of the watermark.
    ClusterDataOutOfWindow,
    /// No node head lies within the window of the watermark.
    NoAlignedNodeData,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NoMembers => "no members",
            SkipReason::UndecodableHead => "undecodable head",
            SkipReason::NoClusterData => "no cluster data",
            SkipReason::ClusterDataOutOfWindow => "cluster data out of window",
            SkipReason::NoAlignedNodeData => "no aligned node data",
        };
        f.write_str(s)
    }
}

/// Result of one [`Collator::try_build`] attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// Every source queue was empty.
    Empty,
    /// A snapshot was appended to the snapshot queue.
    Built(Snapshot),
    /// No snapshot this time; `discarded` items were dropped as unmatchable.
    Skipped { reason: SkipReason, discarded: usize },
}

impl BuildOutcome {
    fn skipped(reason: SkipReason, discarded: usize) -> Self {
        BuildOutcome::Skipped { reason, discarded }
    }

    /// The snapshot, if one was built.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            BuildOutcome::Built(s) => Some(s),
            _ => None,
        }
    }

    /// Number of queue items dropped without being merged.
    pub fn discarded(&self) -> usize {
        match self {
            BuildOutcome::Skipped { discarded, .. } => *discarded,
            _ => 0,
        }
    }

    /// True if the attempt changed any queue.
    pub fn made_progress(&self) -> bool {
        self.snapshot().is_some() || self.discarded() > 0
    }
}

/// Builds snapshots from the heads of the source queues.
#[derive(Debug, Clone)]
pub struct Collator {
    store: Arc<dyn QueueStore>,
    membership: Arc<dyn Membership>,
    window_ms: u64,
    retry: RetryPolicy,
}

impl Collator {
    /// Create a collator over a store and a membership source.
    pub fn new(
        store: Arc<dyn QueueStore>,
        membership: Arc<dyn Membership>,
        window_ms: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            membership,
            window_ms,
            retry,
        }
    }

    /// Attempt to build the oldest fully aligned snapshot.
    ///
    /// Skipped attempts are not errors. Errors are limited to membership
    /// failures, an exhausted snapshot append, and cancellation; in each
    /// case no source item has been consumed.
    pub async fn try_build(&self, shutdown: &mut Shutdown) -> Result<BuildOutcome, AggregateError> {
        let members = self.membership.nodes().await?;
        if members.is_empty() {
            return Ok(BuildOutcome::skipped(SkipReason::NoMembers, 0));
        }

        let mut poisoned = 0;
        let cluster = self.peek::<ClusterData>(CLUSTER_DATA_KEY, &mut poisoned).await;
        let mut heads: Vec<(&str, NodeData)> = Vec::with_capacity(members.len());
        for node in &members {
            if let Some(sample) = self.peek::<NodeData>(node, &mut poisoned).await {
                heads.push((node.as_str(), sample));
            }
        }
        if poisoned > 0 {
            return Ok(BuildOutcome::skipped(SkipReason::UndecodableHead, poisoned));
        }

        let Some(watermark) = heads
            .iter()
            .map(|(_, n)| n.timestamp_ms)
            .chain(cluster.as_ref().map(|c| c.timestamp_ms))
            .min()
        else {
            return Ok(BuildOutcome::Empty);
        };

        let Some(cluster) = cluster else {
            debug!(watermark, "No cluster data yet");
            return Ok(BuildOutcome::skipped(SkipReason::NoClusterData, 0));
        };

        if !within_window(cluster.timestamp_ms, watermark, self.window_ms) {
            // The cluster queue is monotonic, so a node head a full window
            // or more behind the cluster head can never be matched. Heads
            // closer to it wait for the older ones to clear. The watermark
            // head is always among the dropped.
            let orphans: Vec<&str> = heads
                .iter()
                .filter(|(_, n)| {
                    !within_window(cluster.timestamp_ms, n.timestamp_ms, self.window_ms)
                })
                .map(|(key, _)| *key)
                .collect();
            let reason = SkipReason::ClusterDataOutOfWindow;
            let discarded = self.discard(&orphans, reason).await;
            return Ok(BuildOutcome::skipped(reason, discarded));
        }

        let node_data_waiting = !heads.is_empty();
        let (aligned, _newer): (Vec<_>, Vec<_>) = heads
            .into_iter()
            .partition(|(_, n)| within_window(n.timestamp_ms, watermark, self.window_ms));
        let aligned_keys: Vec<&str> = aligned.iter().map(|(key, _)| *key).collect();

        if aligned.is_empty() {
            // Cluster head sits at the watermark with every node head past
            // the window: it is orphaned unless no node has data at all.
            let reason = SkipReason::NoAlignedNodeData;
            let discarded = if node_data_waiting {
                self.discard(&[CLUSTER_DATA_KEY], reason).await
            } else {
                0
            };
            return Ok(BuildOutcome::skipped(reason, discarded));
        }

        let Some(snapshot) = Snapshot::builder(cluster)
            .timestamp_ms(watermark)
            .nodes(aligned.into_iter().map(|(_, n)| n))
            .build()
        else {
            return Ok(BuildOutcome::skipped(SkipReason::NoAlignedNodeData, 0));
        };

        self.append(&snapshot, shutdown).await?;

        self.dequeue(CLUSTER_DATA_KEY).await;
        for key in &aligned_keys {
            self.dequeue(key).await;
        }

        debug!(
            watermark,
            nodes = snapshot.len(),
            skew_ms = snapshot.skew_ms(),
            "Snapshot built"
        );
        Ok(BuildOutcome::Built(snapshot))
    }

    async fn append(&self, snapshot: &Snapshot, shutdown: &mut Shutdown) -> Result<(), AggregateError> {
        let payload = codec::encode(snapshot)?;
        let store = self.store.clone();
        self.retry
            .run("append snapshot", shutdown, || {
                let store = store.clone();
                let payload = payload.clone();
                async move { store.enqueue(SNAPSHOT_KEY, payload).await }
            })
            .await
    }

    /// Peek and decode a queue head. Undecodable heads are dropped and
    /// counted in `poisoned`.
    async fn peek<T: DeserializeOwned>(&self, key: &str, poisoned: &mut usize) -> Option<T> {
        let bytes = match self.store.try_peek(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(queue = key, error = %e, "Peek failed, skipping queue this round");
                return None;
            }
        };

        match codec::decode(&bytes) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(queue = key, error = %e, "Dropping undecodable queue head");
                if self.dequeue(key).await {
                    *poisoned += 1;
                }
                None
            }
        }
    }

    async fn discard(&self, keys: &[&str], reason: SkipReason) -> usize {
        let mut discarded = 0;
        for key in keys {
            if self.dequeue(key).await {
                warn!(queue = *key, %reason, "Dropped sample that can never be aligned");
                discarded += 1;
            }
        }
        discarded
    }

    /// Remove a queue head. A failure leaves the item queued.
    async fn dequeue(&self, key: &str) -> bool {
        match self.store.try_dequeue(key).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(queue = key, error = %e, "Dequeue failed, item stays queued");
                false
            }
        }
    }
}
