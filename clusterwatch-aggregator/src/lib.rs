//! # clusterwatch-aggregator
//!
//! Merges per-node and cluster-wide telemetry queues into a bounded history
//! of time-aligned snapshots.
//!
//! Producers push raw samples into one queue per node plus a cluster-data
//! queue. On every interval the [`Aggregator`] catches up on backlog: it
//! aligns the queue heads on the oldest timestamp (the watermark), merges
//! every head within one window of it into a [`Snapshot`], and keeps at most
//! `capacity` snapshots.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use clusterwatch_aggregator::{codec, Aggregator, TelemetryApi};
//! use clusterwatch_store::{MemoryStore, StaticMembership};
//! use clusterwatch_types::{ClusterData, NodeData, CLUSTER_DATA_KEY};
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let members = Arc::new(StaticMembership::new(["node-1"]));
//! let aggregator = Aggregator::builder(store, members)
//!     .window(Duration::from_millis(500))
//!     .build();
//!
//! for ts in [1_000, 2_000] {
//!     let cluster = codec::encode(&ClusterData::new(ts)).unwrap();
//!     let node = codec::encode(&NodeData::new("node-1", ts + 20)).unwrap();
//!     aggregator.put_data(CLUSTER_DATA_KEY, cluster).await.unwrap();
//!     aggregator.put_data("node-1", node).await.unwrap();
//! }
//!
//! // The newest round stays queued until its successor arrives.
//! let report = aggregator.catch_up().await.unwrap();
//! assert_eq!(report.built, 1);
//!
//! let history = aggregator.get_snapshots(0.0, f64::INFINITY).await;
//! assert_eq!(history[0].timestamp_ms, 1_000);
//! # });
//! ```
//!
//! ## Features
//!
//! - `http` (default): [`http::ApiServer`] and [`RemoteClient`] on hyper

mod aggregator;
mod api;
pub mod codec;
mod collate;
pub mod config;
mod error;
mod retention;
mod retry;
mod shutdown;

#[cfg(feature = "http")]
mod client;
#[cfg(feature = "http")]
pub mod http;

pub use aggregator::{AggregationHandle, Aggregator, AggregatorBuilder, CatchUpReport};
pub use api::{validate_source_key, TelemetryApi};
pub use collate::{within_window, BuildOutcome, Collator, SkipReason};
pub use config::{AggregatorConfig, AggregatorConfigBuilder};
pub use error::{AggregateError, ApiError};
pub use retention::Retention;
pub use retry::RetryPolicy;
pub use shutdown::{Shutdown, ShutdownTrigger};

#[cfg(feature = "http")]
pub use client::{ClientError, RemoteClient};

// Re-export types for convenience
pub use clusterwatch_types::{ClusterData, NodeData, Snapshot};
