//! Sources of the active node list.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clusterwatch_types::is_reserved_key;
use parking_lot::RwLock;

use crate::{QueueStore, StoreError};

/// Returns the names of the nodes currently considered part of the cluster.
///
/// The list may change between calls; callers must re-resolve it every time
/// they need it rather than caching it.
#[async_trait]
pub trait Membership: Send + Sync + Debug {
    /// Current node names, in a stable order.
    async fn nodes(&self) -> Result<Vec<String>, StoreError>;
}

/// A node list managed explicitly by the caller.
///
/// # Example
///
/// ```rust
/// use clusterwatch_store::{Membership, StaticMembership};
///
/// # tokio_test::block_on(async {
/// let members = StaticMembership::new(["node-1", "node-2"]);
/// members.add("node-3");
/// members.remove("node-1");
///
/// assert_eq!(members.nodes().await.unwrap(), vec!["node-2", "node-3"]);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct StaticMembership {
    nodes: RwLock<Vec<String>>,
}

impl StaticMembership {
    /// Create a membership with an initial node list.
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let membership = Self::default();
        membership.set(nodes);
        membership
    }

    /// Replace the whole node list. Duplicates are dropped, first one wins.
    pub fn set<I, S>(&self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for node in nodes {
            let node = node.into();
            if !list.contains(&node) {
                list.push(node);
            }
        }
        *self.nodes.write() = list;
    }

    /// Add a node. Returns `false` if it was already a member.
    pub fn add(&self, node: &str) -> bool {
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|n| n == node) {
            return false;
        }
        nodes.push(node.to_string());
        true
    }

    /// Remove a node. Returns `true` if it was a member.
    pub fn remove(&self, node: &str) -> bool {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|n| n != node);
        nodes.len() != before
    }
}

#[async_trait]
impl Membership for StaticMembership {
    async fn nodes(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.nodes.read().clone())
    }
}

/// Idle time after which a discovered node is no longer a member.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Membership derived from the queues present in a store.
///
/// Every queue whose key is not reserved is treated as a node, so a node
/// joins the moment its first sample is pushed. A node whose queue has not
/// been written to for the idle timeout leaves again; its leftover items
/// stay queued and it rejoins on its next push.
#[derive(Debug)]
pub struct DiscoveredMembership {
    store: Arc<dyn QueueStore>,
    idle_timeout: Option<Duration>,
}

impl DiscoveredMembership {
    /// Discover nodes from the given store with [`DEFAULT_IDLE_TIMEOUT`].
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }

    /// Set the idle timeout. `None` keeps every discovered node forever.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// The configured idle timeout.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    async fn is_active(&self, key: &str) -> Result<bool, StoreError> {
        let Some(timeout) = self.idle_timeout else {
            return Ok(true);
        };
        Ok(match self.store.idle_for(key).await? {
            Some(idle) => idle < timeout,
            None => true,
        })
    }
}

#[async_trait]
impl Membership for DiscoveredMembership {
    async fn nodes(&self) -> Result<Vec<String>, StoreError> {
        let mut nodes = Vec::new();
        for key in self.store.keys().await? {
            if !is_reserved_key(&key) && self.is_active(&key).await? {
                nodes.push(key);
            }
        }
        Ok(nodes)
    }
}
