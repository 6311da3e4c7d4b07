//! Bounded snapshot history.

use std::sync::Arc;

use clusterwatch_store::QueueStore;
use clusterwatch_types::SNAPSHOT_KEY;
use tracing::debug;

use crate::error::AggregateError;

/// Keeps the snapshot queue at or below a fixed capacity by evicting the
/// oldest entries.
#[derive(Debug, Clone)]
pub struct Retention {
    store: Arc<dyn QueueStore>,
    capacity: usize,
}

impl Retention {
    /// Create a retention manager for the given capacity.
    pub fn new(store: Arc<dyn QueueStore>, capacity: usize) -> Self {
        Self { store, capacity }
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Evict oldest snapshots until the queue fits. Returns how many were
    /// evicted.
    pub async fn prune(&self) -> Result<usize, AggregateError> {
        let mut evicted = 0;
        while self.store.count(SNAPSHOT_KEY).await? > self.capacity {
            match self.store.try_dequeue(SNAPSHOT_KEY).await? {
                Some(_) => evicted += 1,
                None => break,
            }
        }
        if evicted > 0 {
            debug!(evicted, capacity = self.capacity, "Evicted oldest snapshots");
        }
        Ok(evicted)
    }
}
