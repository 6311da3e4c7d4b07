//! ClusterData - one cluster-wide sample.

use crate::{Counts, Sample};

/// Cluster-wide facts at one point in time.
///
/// There is a single queue of these; every snapshot carries exactly one.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct ClusterData {
    /// Unix timestamp in milliseconds when the sample was taken.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub timestamp_ms: u64,

    /// Deployed replicas and instances across all applications.
    #[cfg_attr(feature = "serde", serde(default))]
    #[cfg_attr(feature = "minicbor", n(1))]
    pub counts: Counts,

    /// Number of nodes the cluster reported as up.
    #[cfg_attr(feature = "serde", serde(default))]
    #[cfg_attr(feature = "minicbor", n(2))]
    pub node_count: u32,
}

impl ClusterData {
    /// Create a sample with zeroed counts.
    pub fn new(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ..Default::default()
        }
    }

    /// Attach deployment counts.
    pub fn with_counts(mut self, counts: Counts) -> Self {
        self.counts = counts;
        self
    }

    /// Attach the reported node count.
    pub fn with_node_count(mut self, node_count: u32) -> Self {
        self.node_count = node_count;
        self
    }
}

impl Sample for ClusterData {
    fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}
