//! Snapshot - a time-aligned, cluster-wide merge of samples.

use crate::{ClusterData, NodeData, Sample, SchemaVersion};

/// A merged view of the cluster at one aggregation watermark.
///
/// A snapshot always holds exactly one [`ClusterData`] and at least one
/// [`NodeData`]; [`SnapshotBuilder::build`] refuses to produce anything
/// else. Nodes that had no aligned sample at the watermark are simply absent.
///
/// # Example
///
/// ```rust
/// use clusterwatch_types::{ClusterData, NodeData, Snapshot};
///
/// let snapshot = Snapshot::builder(ClusterData::new(100))
///     .node(NodeData::new("n1", 110))
///     .node(NodeData::new("n2", 105))
///     .build()
///     .unwrap();
///
/// // Without an explicit watermark, the oldest merged sample is used.
/// assert_eq!(snapshot.timestamp_ms, 100);
/// assert!(snapshot.get("n2").is_some());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct Snapshot {
    /// Schema version for forward compatibility.
    #[cfg_attr(feature = "serde", serde(default))]
    #[cfg_attr(feature = "minicbor", n(0))]
    pub version: SchemaVersion,

    /// The alignment watermark: the oldest timestamp among merged samples.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub timestamp_ms: u64,

    /// The cluster-wide sample.
    #[cfg_attr(feature = "minicbor", n(2))]
    pub cluster: ClusterData,

    /// Node samples, in membership order.
    #[cfg_attr(feature = "minicbor", n(3))]
    pub nodes: Vec<NodeData>,
}

impl Snapshot {
    /// Create a builder around the mandatory cluster sample.
    pub fn builder(cluster: ClusterData) -> SnapshotBuilder {
        SnapshotBuilder::new(cluster)
    }

    /// Number of node samples.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a snapshot obtained from the builder.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the sample for a specific node.
    pub fn get(&self, node_name: &str) -> Option<&NodeData> {
        self.nodes.iter().find(|n| n.node_name == node_name)
    }

    /// Iterate over node samples.
    pub fn iter(&self) -> impl Iterator<Item = &NodeData> {
        self.nodes.iter()
    }

    /// Names of the nodes present in this snapshot.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.node_name.as_str())
    }

    /// Returns true if the watermark lies in `[low_ms, high_ms]`.
    pub fn in_range(&self, low_ms: f64, high_ms: f64) -> bool {
        let ts = self.timestamp_ms as f64;
        ts >= low_ms && ts <= high_ms
    }

    /// Largest distance between the watermark and any merged sample.
    pub fn skew_ms(&self) -> u64 {
        self.nodes
            .iter()
            .map(|n| n.timestamp_ms)
            .chain(std::iter::once(self.cluster.timestamp_ms))
            .map(|ts| ts.saturating_sub(self.timestamp_ms))
            .max()
            .unwrap_or(0)
    }
}

impl Sample for Snapshot {
    fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

/// Builder for constructing `Snapshot` instances.
#[derive(Debug)]
pub struct SnapshotBuilder {
    timestamp_ms: Option<u64>,
    cluster: ClusterData,
    nodes: Vec<NodeData>,
}

impl SnapshotBuilder {
    /// Create a new builder.
    pub fn new(cluster: ClusterData) -> Self {
        Self {
            timestamp_ms: None,
            cluster,
            nodes: Vec::new(),
        }
    }

    /// Set the watermark explicitly.
    pub fn timestamp_ms(mut self, ts: u64) -> Self {
        self.timestamp_ms = Some(ts);
        self
    }

    /// Add a node sample.
    pub fn node(mut self, node: NodeData) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add several node samples.
    pub fn nodes(mut self, nodes: impl IntoIterator<Item = NodeData>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    /// Build the snapshot, or `None` if no node sample was added.
    ///
    /// Without an explicit watermark the oldest merged timestamp is used.
    pub fn build(self) -> Option<Snapshot> {
        if self.nodes.is_empty() {
            return None;
        }

        let oldest = self
            .nodes
            .iter()
            .map(|n| n.timestamp_ms)
            .fold(self.cluster.timestamp_ms, u64::min);

        Some(Snapshot {
            version: SchemaVersion::current(),
            timestamp_ms: self.timestamp_ms.unwrap_or(oldest),
            cluster: self.cluster,
            nodes: self.nodes,
        })
    }
}
