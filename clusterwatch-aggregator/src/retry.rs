//! Bounded exponential back-off for store writes that must not be lost.

use std::future::Future;
use std::time::Duration;

use clusterwatch_store::StoreError;
use tracing::warn;

use crate::error::AggregateError;
use crate::shutdown::Shutdown;

/// Exponential back-off policy.
///
/// The delay before retry `n` (zero-based) is `initial_delay * 2^n`, capped
/// at `max_delay`. Only transient [`StoreError`]s are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Total attempts before giving up. `None` retries until shutdown.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            max_attempts: Some(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: Some(1),
            ..Self::default()
        }
    }

    /// Delay to wait after the given number of failures (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts,
    /// or `shutdown` fires.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        shutdown: &mut Shutdown,
        mut op: F,
    ) -> Result<T, AggregateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut failures = 0u32;

        loop {
            if shutdown.is_triggered() {
                return Err(AggregateError::Cancelled);
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e.into()),
            };

            failures += 1;
            if self.max_attempts.is_some_and(|max| failures >= max) {
                return Err(AggregateError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: failures,
                    source: err,
                });
            }

            let delay = self.delay_for(failures - 1);
            warn!(
                operation,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Store operation failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.triggered() => return Err(AggregateError::Cancelled),
            }
        }
    }
}
