//! In-process queue store.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::{QueueStore, StoreError};

#[derive(Debug)]
struct Slot {
    items: VecDeque<Vec<u8>>,
    // Creation or latest enqueue
    touched: Instant,
}

impl Slot {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            touched: Instant::now(),
        }
    }
}

type Queue = Mutex<Slot>;

/// A [`QueueStore`] kept entirely in memory.
///
/// Each queue has its own mutex, so operations on different queues never
/// contend and every call on one queue is a single critical section. No lock
/// is ever held across an `.await`. Contents are lost when the store is
/// dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    queues: RwLock<BTreeMap<String, Arc<Queue>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the queue for a key.
    fn get_or_create(&self, key: &str) -> Arc<Queue> {
        // Fast path: check if it exists
        {
            let queues = self.queues.read();
            if let Some(queue) = queues.get(key) {
                return queue.clone();
            }
        }

        // Slow path: create it
        let mut queues = self.queues.write();
        queues
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::new())))
            .clone()
    }

    /// Get the queue for a key without creating it.
    fn get(&self, key: &str) -> Option<Arc<Queue>> {
        self.queues.read().get(key).cloned()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn open(&self, key: &str) -> Result<(), StoreError> {
        self.get_or_create(key);
        Ok(())
    }

    async fn enqueue(&self, key: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        let queue = self.get_or_create(key);
        let mut slot = queue.lock();
        slot.items.push_back(payload);
        slot.touched = Instant::now();
        Ok(())
    }

    async fn try_peek(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get(key).and_then(|q| q.lock().items.front().cloned()))
    }

    async fn try_dequeue(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get(key).and_then(|q| q.lock().items.pop_front()))
    }

    async fn count(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.get(key).map_or(0, |q| q.lock().items.len()))
    }

    async fn items(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(self
            .get(key)
            .map(|q| q.lock().items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        if let Some(queue) = self.get(key) {
            queue.lock().items.clear();
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.queues.read().keys().cloned().collect())
    }

    async fn idle_for(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        Ok(self.get(key).map(|q| q.lock().touched.elapsed()))
    }
}
