//! Error types for queue stores and membership sources.

use thiserror::Error;

/// Errors that can occur when talking to a queue store or membership source.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the operation for now.
    ///
    /// Callers may retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A transaction was rolled back instead of committed.
    #[error("Transaction aborted on queue {queue}: {reason}")]
    Aborted { queue: String, reason: String },

    /// The membership source could not list nodes.
    #[error("Membership query failed: {0}")]
    Membership(String),
}

impl StoreError {
    /// Returns true for failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Aborted { .. })
    }
}
