//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::StrandError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    #[serde(with = "crate::config::duration_ms")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    #[serde(with = "crate::config::duration_ms")]
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// The last error seen by [`RetryPolicy::execute`] and how many attempts
/// were made before giving up.
#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: StrandError,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Execute an async operation with retry.
    ///
    /// Non-retryable errors are returned after the attempt that produced
    /// them. A provider-supplied `retry_after` replaces the computed
    /// backoff when it is longer, capped at `max_backoff`.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StrandError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                return Err(RetryFailure {
                    attempts: attempt,
                    error,
                });
            }

            tracing::warn!(
                attempt,
                max_attempts,
                error = %error,
                "Retrying after error"
            );

            let mut delay = jittered(backoff);
            if let Some(ms) = error.retry_after_ms() {
                delay = delay.max(Duration::from_millis(ms)).min(self.max_backoff);
            }
            tokio::time::sleep(delay).await;

            backoff = Duration::from_secs_f64(
                (backoff.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
            );
        }
    }
}

// 75%-125% of the nominal backoff.
fn jittered(backoff: Duration) -> Duration {
    let factor = rand::rng().random_range(0.75..=1.25);
    Duration::from_secs_f64(backoff.as_secs_f64() * factor)
}
