//! # clusterwatch-types
//!
//! Core types for cluster telemetry aggregation. This crate defines the
//! schema shared by the per-node producers that push raw samples, the
//! aggregator that merges them, and the consumers that query snapshot
//! history.
//!
//! ## Design Goals
//!
//! - **Zero required dependencies**: Core types work without any serialization framework
//! - **Optional serialization**: Enable `serde` and/or `minicbor` features as needed
//! - **Valid by construction**: A [`Snapshot`] always carries cluster data and at least one node sample
//! - **Versioned schema**: Snapshots include version info for forward compatibility
//!
//! ## Features
//!
//! - `serde`: JSON/MessagePack/etc. serialization via serde
//! - `minicbor`: Compact binary serialization via CBOR
//! - `all`: Enable all serialization formats
//!
//! ## Example
//!
//! ```rust
//! use clusterwatch_types::{ClusterData, NodeData, Snapshot};
//!
//! let cluster = ClusterData::new(1_000);
//! let node = NodeData::builder("node-1")
//!     .timestamp_ms(1_020)
//!     .hardware(|h| h.cpu_percent(12.5).memory(16, 4_096))
//!     .build();
//!
//! let snapshot = Snapshot::builder(cluster)
//!     .timestamp_ms(1_000)
//!     .node(node)
//!     .build()
//!     .expect("snapshot has a node sample");
//!
//! assert_eq!(snapshot.len(), 1);
//! ```
//!
//! ## Queue Keys
//!
//! Raw samples live in one queue per node (keyed by node name) plus the
//! reserved [`CLUSTER_DATA_KEY`] queue; merged snapshots live in the reserved
//! [`SNAPSHOT_KEY`] queue.

mod cluster;
mod hardware;
mod keys;
mod node;
mod snapshot;
mod version;

pub use cluster::*;
pub use hardware::*;
pub use keys::*;
pub use node::*;
pub use snapshot::*;
pub use version::*;

/// Major revision of the snapshot layout. See [`SchemaVersion`].
pub const SCHEMA_VERSION: u32 = 1;

/// A telemetry record positioned in time.
///
/// Every item stored in a source queue implements this; the aggregator only
/// ever looks at the timestamp, the rest of the record is carried through.
pub trait Sample {
    /// Milliseconds since the Unix epoch at which the sample was taken.
    fn timestamp_ms(&self) -> u64;
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
