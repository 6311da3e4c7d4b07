//! # clusterwatch
//!
//! Command-line front end for the clusterwatch aggregator.
//!
//! Per-node collectors and a cluster-wide producer push raw samples to a
//! `clusterwatch serve` instance over HTTP. The server merges them into
//! time-aligned snapshots on a fixed interval and keeps a bounded history
//! that clients can query by time range.
//!
//! ```text
//!  collectors ──POST /data/{node}──▶ ┌──────────────────────────┐
//!  cluster    ──POST /data/__cluster_data──▶ │ source queues   │
//!                                    │      │ aggregation loop  │
//!                                    │      ▼                   │
//!  consumers ◀──GET /snapshots────── │ snapshot history (cap N) │
//!                                    └──────────────────────────┘
//! ```
//!
//! - **[`settings`]**: layered configuration (file, `CLUSTERWATCH_*`
//!   environment, command-line overrides)
//! - **[`service`]**: store, membership, aggregator and API server wiring
//! - **[`commands`]**: the `push`, `pull`, `snapshots` and `clear` clients
//!
//! ## Usage
//!
//! ```bash
//! # Run the server with static membership
//! clusterwatch serve --node node-1 --node node-2 --interval-ms 5000
//!
//! # Push a sample and read the history back
//! clusterwatch push --key node-1 --file sample.json
//! clusterwatch snapshots --from 0 --output history.json
//! ```

pub mod commands;
pub mod service;
pub mod settings;

pub use service::{init_tracing, serve, Service};
pub use settings::{MembershipMode, Overrides, Settings};
