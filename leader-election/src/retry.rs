//! Exponential backoff for transient coordination failures

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::CoordinationError;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Whether to add up to 25% random jitter to delays
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_delay_ms as f64);

        let jitter_ms = if self.use_jitter {
            capped_ms * 0.25 * rand::random::<f64>()
        } else {
            0.0
        };

        Duration::from_millis((capped_ms + jitter_ms).min(self.max_delay_ms as f64) as u64)
    }

    /// Run `operation`, retrying connectivity errors with backoff.
    ///
    /// Non-retryable errors are returned immediately.
    pub async fn retry<F, Fut, T>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, CoordinationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoordinationError>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            retries = attempt,
                            "operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    debug!(
                        operation = operation_name,
                        attempt,
                        error = %error,
                        ?delay,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                }
                Err(error) => {
                    if error.is_retryable() {
                        warn!(
                            operation = operation_name,
                            retries = attempt,
                            error = %error,
                            "giving up after retries"
                        );
                    }
                    return Err(error);
                }
            }
        }
    }
}
