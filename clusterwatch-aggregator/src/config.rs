//! Aggregation settings.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default wake interval of the aggregation loop.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10_000);

/// Default snapshot history length: 24 hours at the default interval.
pub const DEFAULT_CAPACITY: usize = 8640;

/// Configuration for an [`Aggregator`](crate::Aggregator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// How often the loop wakes to catch up on backlog.
    pub interval: Duration,
    /// Maximum number of snapshots retained.
    pub capacity: usize,
    /// Alignment tolerance: a head is current if it is less than this far
    /// past the watermark.
    pub window: Duration,
    /// Back-off for queue creation and snapshot appends.
    pub retry: RetryPolicy,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            capacity: DEFAULT_CAPACITY,
            window: DEFAULT_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

impl AggregatorConfig {
    /// Create a new builder for AggregatorConfig.
    pub fn builder() -> AggregatorConfigBuilder {
        AggregatorConfigBuilder::default()
    }

    /// The alignment window in milliseconds.
    pub fn window_ms(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Builder for AggregatorConfig.
#[derive(Debug, Default)]
pub struct AggregatorConfigBuilder {
    interval: Option<Duration>,
    capacity: Option<usize>,
    window: Option<Duration>,
    retry: Option<RetryPolicy>,
}

impl AggregatorConfigBuilder {
    /// Set the loop interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Set the snapshot retention capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the alignment window. Defaults to the interval.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Build the AggregatorConfig.
    ///
    /// A zero interval, window or capacity is raised to the smallest usable
    /// value.
    pub fn build(self) -> AggregatorConfig {
        let interval = self
            .interval
            .unwrap_or(DEFAULT_INTERVAL)
            .max(Duration::from_millis(1));
        AggregatorConfig {
            interval,
            capacity: self.capacity.unwrap_or(DEFAULT_CAPACITY).max(1),
            window: self.window.unwrap_or(interval).max(Duration::from_millis(1)),
            retry: self.retry.unwrap_or_default(),
        }
    }
}
