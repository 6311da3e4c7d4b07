//! Client-side subcommands against a running server.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clusterwatch_aggregator::{RemoteClient, TelemetryApi};

/// Push the bytes of a file into a source queue.
pub async fn push(client: &RemoteClient, key: &str, file: &Path) -> Result<()> {
    let payload =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let len = payload.len();
    client
        .put_data(key, payload)
        .await
        .with_context(|| format!("Failed to push to {key:?} on {}", client.addr()))?;
    tracing::info!(key, bytes = len, "Pushed payload");
    Ok(())
}

/// Print each payload of a source queue on its own line.
pub async fn pull(client: &RemoteClient, key: &str, out: &mut impl Write) -> Result<usize> {
    let items = client
        .try_get_data(key)
        .await
        .with_context(|| format!("Failed to pull {key:?} from {}", client.addr()))?;
    for item in &items {
        writeln!(out, "{}", String::from_utf8_lossy(item))?;
    }
    Ok(items.len())
}

/// Print matching snapshots as pretty JSON, or write them to `output`.
pub async fn snapshots(
    client: &RemoteClient,
    from: Option<f64>,
    to: Option<f64>,
    output: Option<&Path>,
    out: &mut impl Write,
) -> Result<usize> {
    let low = from.unwrap_or(f64::NEG_INFINITY);
    let high = to.unwrap_or(f64::INFINITY);
    let found = client
        .try_get_snapshots(low, high)
        .await
        .with_context(|| format!("Failed to query snapshots from {}", client.addr()))?;

    let json = serde_json::to_string_pretty(&found)?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => writeln!(out, "{}", json)?,
    }
    Ok(found.len())
}

/// Delete the server's snapshot history.
pub async fn clear(client: &RemoteClient) -> Result<()> {
    client
        .try_delete_all_snapshots()
        .await
        .with_context(|| format!("Failed to clear snapshots on {}", client.addr()))
}
