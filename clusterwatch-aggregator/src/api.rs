//! The remote API surface: ingestion, raw reads and snapshot queries.

use async_trait::async_trait;
use clusterwatch_types::{Snapshot, SNAPSHOT_KEY};
use tracing::warn;

use crate::aggregator::Aggregator;
use crate::codec;
use crate::error::ApiError;

/// Operations offered to producers and consumers of telemetry.
///
/// Ingestion reports failure; retrievals degrade to empty results and
/// clearing history is fire-and-forget.
#[async_trait]
pub trait TelemetryApi: Send + Sync {
    /// Append a raw payload to a source queue, creating the queue if needed.
    ///
    /// The payload is stored as-is; nothing is validated.
    async fn put_data(&self, source_key: &str, payload: Vec<u8>) -> Result<(), ApiError>;

    /// Current content of a source queue, oldest first, without removing it.
    async fn get_data(&self, source_key: &str) -> Vec<Vec<u8>>;

    /// Snapshots whose watermark lies in `[low_ms, high_ms]`, oldest first.
    async fn get_snapshots(&self, low_ms: f64, high_ms: f64) -> Vec<Snapshot>;

    /// Drop the whole snapshot history.
    async fn delete_all_snapshots(&self);
}

/// Check that a key may receive producer data.
pub fn validate_source_key(key: &str) -> Result<(), ApiError> {
    if key.is_empty() || key == SNAPSHOT_KEY {
        return Err(ApiError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl TelemetryApi for Aggregator {
    async fn put_data(&self, source_key: &str, payload: Vec<u8>) -> Result<(), ApiError> {
        validate_source_key(source_key)?;

        let retry = self.config().retry;
        let mut shutdown = self.shutdown_signal();
        let store = self.store().clone();
        let key = source_key.to_string();

        retry
            .run("open queue", &mut shutdown, || {
                let store = store.clone();
                let key = key.clone();
                async move { store.open(&key).await }
            })
            .await?;

        retry
            .run("enqueue sample", &mut shutdown, || {
                let store = store.clone();
                let key = key.clone();
                let payload = payload.clone();
                async move { store.enqueue(&key, payload).await }
            })
            .await?;

        Ok(())
    }

    async fn get_data(&self, source_key: &str) -> Vec<Vec<u8>> {
        match self.store().items(source_key).await {
            Ok(items) => items,
            Err(e) => {
                warn!(queue = source_key, error = %e, "Failed to read queue");
                Vec::new()
            }
        }
    }

    async fn get_snapshots(&self, low_ms: f64, high_ms: f64) -> Vec<Snapshot> {
        let items = match self.store().items(SNAPSHOT_KEY).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Failed to read snapshot history");
                return Vec::new();
            }
        };

        items
            .iter()
            .filter_map(|bytes| match codec::decode::<Snapshot>(bytes) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable snapshot");
                    None
                }
            })
            .filter(|s| {
                let readable = s.version.is_compatible();
                if !readable {
                    warn!(
                        version = %s.version,
                        timestamp_ms = s.timestamp_ms,
                        "Skipping snapshot with incompatible schema"
                    );
                }
                readable
            })
            .filter(|s| s.in_range(low_ms, high_ms))
            .collect()
    }

    async fn delete_all_snapshots(&self) {
        if let Err(e) = self.store().clear(SNAPSHOT_KEY).await {
            warn!(error = %e, "Failed to clear snapshot history");
        }
    }
}
