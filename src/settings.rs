//! Service settings: file, then environment, then command-line overrides.

use std::path::Path;
use std::time::Duration;

use clusterwatch_aggregator::http::{ServerConfig, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_BODY_BYTES};
use clusterwatch_aggregator::{config::DEFAULT_CAPACITY, AggregatorConfig, RetryPolicy};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Prefix for environment overrides, e.g. `CLUSTERWATCH_INTERVAL_MS` or
/// `CLUSTERWATCH_RETRY__MAX_ATTEMPTS`.
pub const ENV_PREFIX: &str = "CLUSTERWATCH";

/// Where the node list comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipMode {
    /// Every non-reserved queue in the store is a node.
    #[default]
    Discover,
    /// Only the configured `nodes`.
    Static,
}

/// Back-off for queue creation and snapshot appends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_ms: u64,
    pub max_ms: u64,
    /// Total attempts; 0 retries until shutdown.
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_ms: 50,
            max_ms: 5_000,
            max_attempts: 8,
        }
    }
}

impl RetrySettings {
    /// Convert to the engine's policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.initial_ms),
            max_delay: Duration::from_millis(self.max_ms),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
        }
    }
}

/// Settings for `clusterwatch serve`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub interval_ms: u64,
    pub capacity: usize,
    /// Defaults to `interval_ms`.
    pub window_ms: Option<u64>,
    pub listen_addr: String,
    pub max_body_bytes: usize,
    pub membership: MembershipMode,
    pub nodes: Vec<String>,
    /// Discovered nodes silent this long drop out. Defaults to three
    /// intervals; 0 keeps them forever.
    pub idle_timeout_ms: Option<u64>,
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            capacity: DEFAULT_CAPACITY,
            window_ms: None,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            membership: MembershipMode::Discover,
            nodes: Vec::new(),
            idle_timeout_ms: None,
            retry: RetrySettings::default(),
        }
    }
}

/// Command-line overrides applied on top of file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen_addr: Option<String>,
    pub interval_ms: Option<u64>,
    pub capacity: Option<usize>,
    pub window_ms: Option<u64>,
    /// A non-empty list switches to static membership.
    pub nodes: Vec<String>,
}

impl Settings {
    /// Load settings from an optional file plus `CLUSTERWATCH_*` variables.
    ///
    /// The file format follows its extension (TOML, YAML, JSON...).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub(crate) fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("nodes"),
            )
            .build()?
            .try_deserialize()
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(addr) = overrides.listen_addr {
            self.listen_addr = addr;
        }
        if let Some(interval) = overrides.interval_ms {
            self.interval_ms = interval;
        }
        if let Some(capacity) = overrides.capacity {
            self.capacity = capacity;
        }
        if let Some(window) = overrides.window_ms {
            self.window_ms = Some(window);
        }
        if !overrides.nodes.is_empty() {
            self.membership = MembershipMode::Static;
            self.nodes = overrides.nodes;
        }
    }

    /// Engine configuration.
    pub fn aggregator_config(&self) -> AggregatorConfig {
        let interval = Duration::from_millis(self.interval_ms);
        AggregatorConfig::builder()
            .interval(interval)
            .capacity(self.capacity)
            .window(self.window_ms.map_or(interval, Duration::from_millis))
            .retry(self.retry.policy())
            .build()
    }

    /// Idle timeout for discovered membership.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => Some(Duration::from_millis(self.interval_ms.saturating_mul(3))),
        }
    }

    /// HTTP server configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::builder()
            .listen_addr(self.listen_addr.clone())
            .max_body_bytes(self.max_body_bytes)
            .build()
    }
}
