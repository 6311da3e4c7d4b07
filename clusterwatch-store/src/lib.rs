//! # clusterwatch-store
//!
//! Storage and membership collaborators for the clusterwatch aggregator.
//!
//! The aggregator never talks to a concrete backend; it holds an
//! `Arc<dyn QueueStore>` and an `Arc<dyn Membership>`. This crate defines
//! those traits and ships in-process implementations:
//!
//! - [`MemoryStore`]: keyed FIFO queues of opaque byte payloads, each queue
//!   individually locked so every call behaves like its own short transaction
//! - [`StaticMembership`]: an explicitly managed node list
//! - [`DiscoveredMembership`]: the node list derived from the store's queue
//!   keys, leaving out queues whose producer has gone quiet
//!
//! ## Quick Start
//!
//! ```rust
//! use clusterwatch_store::{MemoryStore, QueueStore};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! store.enqueue("node-1", b"sample".to_vec()).await?;
//!
//! assert_eq!(store.count("node-1").await?, 1);
//! assert_eq!(store.try_peek("node-1").await?, Some(b"sample".to_vec()));
//! # Ok::<_, clusterwatch_store::StoreError>(())
//! # }).unwrap();
//! ```

pub mod error;
mod membership;
mod memory;

pub use error::StoreError;
pub use membership::{DiscoveredMembership, Membership, StaticMembership, DEFAULT_IDLE_TIMEOUT};
pub use memory::MemoryStore;

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

/// A store of named FIFO queues holding opaque payloads.
///
/// Every method is scoped to a single queue and is atomic on its own: it
/// either fully applies or not at all. Nothing spans queues. Queues are
/// created lazily by [`open`](QueueStore::open) and
/// [`enqueue`](QueueStore::enqueue); reading a queue that was never created
/// behaves like reading an empty one.
#[async_trait]
pub trait QueueStore: Send + Sync + Debug {
    /// Create the queue if it does not exist yet.
    async fn open(&self, key: &str) -> Result<(), StoreError>;

    /// Append a payload to the tail of the queue, creating it if needed.
    async fn enqueue(&self, key: &str, payload: Vec<u8>) -> Result<(), StoreError>;

    /// Return the head of the queue without removing it.
    async fn try_peek(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove and return the head of the queue.
    async fn try_dequeue(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Number of items currently in the queue.
    async fn count(&self, key: &str) -> Result<usize, StoreError>;

    /// Full content of the queue, oldest first, without removing anything.
    async fn items(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Remove every item from the queue.
    async fn clear(&self, key: &str) -> Result<(), StoreError>;

    /// Names of all queues that exist.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Time since the queue was created or last enqueued to.
    ///
    /// `None` when the queue does not exist or the backend does not track
    /// producer activity; such queues are never treated as idle.
    async fn idle_for(&self, _key: &str) -> Result<Option<Duration>, StoreError> {
        Ok(None)
    }
}
