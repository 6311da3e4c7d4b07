//! Wiring for `clusterwatch serve`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clusterwatch_aggregator::http::ApiServer;
use clusterwatch_aggregator::Aggregator;
use clusterwatch_store::{DiscoveredMembership, Membership, MemoryStore, QueueStore, StaticMembership};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::settings::{MembershipMode, Settings};

/// Install the global tracing subscriber. `RUST_LOG` overrides the level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}

/// A configured but not yet running service.
#[derive(Debug)]
pub struct Service {
    pub aggregator: Aggregator,
    pub server: ApiServer,
}

impl Service {
    /// Create the store, membership, aggregator, and bind the API listener.
    pub async fn build(settings: &Settings) -> Result<Self> {
        let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
        let membership = membership(settings, store.clone());

        let aggregator = Aggregator::builder(store, membership)
            .config(settings.aggregator_config())
            .build();

        let server_config = settings.server_config();
        let server = ApiServer::bind(&server_config, Arc::new(aggregator.clone()))
            .await
            .with_context(|| format!("Failed to bind {}", server_config.listen_addr))?;

        Ok(Self { aggregator, server })
    }

    /// Run until the aggregator is shut down, then wait for both tasks.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.aggregator.shutdown_signal();
        let aggregation = self.aggregator.start();
        let server = self.server.spawn(shutdown.clone());

        let mut shutdown = shutdown;
        shutdown.triggered().await;
        info!("Shutting down");

        aggregation.join().await;
        server.await.context("API server task failed")?;
        Ok(())
    }
}

fn membership(settings: &Settings, store: Arc<dyn QueueStore>) -> Arc<dyn Membership> {
    match settings.membership {
        MembershipMode::Discover => {
            let idle_timeout = settings.idle_timeout();
            info!(
                idle_timeout_ms = idle_timeout.map(|d| d.as_millis() as u64),
                "Discovering nodes from source queues"
            );
            Arc::new(DiscoveredMembership::new(store).with_idle_timeout(idle_timeout))
        }
        MembershipMode::Static => {
            if settings.nodes.is_empty() {
                warn!("Static membership with no nodes configured; no snapshots will be built");
            }
            info!(nodes = ?settings.nodes, "Using static membership");
            Arc::new(StaticMembership::new(settings.nodes.iter().cloned()))
        }
    }
}

/// Build and run the service until Ctrl-C.
pub async fn serve(settings: Settings) -> Result<()> {
    let service = Service::build(&settings).await?;
    let aggregator = service.aggregator.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        aggregator.shutdown();
    });

    service.run().await
}
