//! Retry helper for external calls.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: usize,
    /// Backoff before the first retry; doubles per attempt
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
        }
    }
}

/// Run `op` up to `config.max_attempts` times, backing off exponentially
/// between attempts. Errors that `is_retryable` rejects are returned
/// immediately.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    config: &RetryConfig,
    is_retryable: P,
    mut op: F,
) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut backoff_ms = config.initial_backoff_ms;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && is_retryable(&e) => {
                warn!(attempt, backoff_ms, error = %e, "Retrying after transient failure");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = backoff_ms.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop always returns")
}
