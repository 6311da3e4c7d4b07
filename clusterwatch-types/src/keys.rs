//! Reserved queue keys.
//!
//! Node queues are keyed by node name. Two keys are reserved and must never
//! be used as node names.

/// Queue holding cluster-wide samples.
pub const CLUSTER_DATA_KEY: &str = "__cluster_data";

/// Queue holding the merged snapshot history.
pub const SNAPSHOT_KEY: &str = "__snapshots";

/// Returns true for keys owned by the aggregator rather than by a node.
pub fn is_reserved_key(key: &str) -> bool {
    key == CLUSTER_DATA_KEY || key == SNAPSHOT_KEY
}
