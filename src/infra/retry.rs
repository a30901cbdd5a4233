//! Retry policy
//!
//! Bounded retries with exponential backoff, shared by artifact downloads and
//! remote patch retrieval.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::defaults;

/// How often and how patiently to retry a failing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: defaults::MAX_DOWNLOAD_RETRIES,
            base_delay: Duration::from_millis(defaults::BACKOFF_BASE_MS),
            max_delay: Duration::from_millis(defaults::BACKOFF_MAX_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy from a retry count and delays in milliseconds
    pub fn new(retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            retries,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms.max(base_delay_ms)),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delays between consecutive attempts
    pub fn delays(&self) -> Vec<Duration> {
        let mut backoff = self.backoff();
        (0..self.retries)
            .map(|_| backoff.next_backoff().unwrap_or(self.max_delay))
            .collect()
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the retries are used up
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        retryable: impl Fn(&E) -> bool,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut delays = self.delays().into_iter();
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) => {
                    let Some(delay) = delays.next() else {
                        return Err(e);
                    };
                    attempt += 1;
                    tracing::debug!(
                        "{label} failed ({e}); retry {attempt}/{} in {delay:?}",
                        self.retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
