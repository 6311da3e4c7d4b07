//! Error types for the aggregation engine.

use clusterwatch_store::StoreError;
use thiserror::Error;

use crate::codec::CodecError;

/// Errors raised while building, storing or serving snapshots.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// A store or membership call failed and was not retried.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A retried store operation kept failing.
    #[error("Gave up on {operation} after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Shutdown was requested while the operation was in progress.
    #[error("Aggregation cancelled")]
    Cancelled,
}

impl AggregateError {
    /// Returns true if this error is the shutdown signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AggregateError::Cancelled)
    }
}

/// Errors surfaced by the remote API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The source key is empty or reserved.
    #[error("Invalid source key: {0:?}")]
    InvalidKey(String),

    /// The request reached the engine but could not be completed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// The request could not be delivered or the server refused it.
    #[error("Transport error: {0}")]
    Transport(String),
}
