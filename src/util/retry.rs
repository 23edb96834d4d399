//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use crate::error::StrandError;

/// Retry policy for backend calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `max_retries` retries after the first attempt.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            ..Self::default()
        }
    }

    /// Run `operation`, retrying errors that report [`StrandError::is_retryable`].
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, StrandError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StrandError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "retrying backend call"
                    );
                    let jitter = 0.75 + jitter_fraction() * 0.5;
                    tokio::time::sleep(backoff.mul_f64(jitter)).await;
                    backoff = backoff.mul_f64(self.multiplier).min(self.max_backoff);
                }
            }
        }
    }
}

/// Pseudo-random value in `[0, 1)`, good enough to spread retries.
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 10_000) / 10_000.0
}
