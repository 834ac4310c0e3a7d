//! Retry Module
//!
//! Re-runs a fallible async operation with exponential backoff. The wait
//! between attempts is the only suspension point and it is cancellable.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RetryError;

// == Retry Config ==
/// Backoff parameters for [`execute_with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; the operation runs at most
    /// `max_retries + 1` times
    pub max_retries: u32,
    /// Wait before the first retry
    pub initial_interval: Duration,
    /// Upper bound for any single wait
    pub max_interval: Duration,
    /// Growth factor applied to the wait after each retry
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Wait before retry number `retry` (0-indexed), capped at `max_interval`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);

        Duration::try_from_secs_f64(secs)
            .map_or(self.max_interval, |delay| delay.min(self.max_interval))
    }
}

/// Runs `operation` until it succeeds, retries are exhausted, or `token` is
/// cancelled.
///
/// Cancellation is checked before every attempt and raced against every
/// backoff wait; either returns [`RetryError::Cancelled`] immediately. When
/// all attempts fail, the last attempt's error is returned unchanged.
pub async fn execute_with_retry<F, Fut, T, E>(
    token: &CancellationToken,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retry = 0u32;

    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if retry >= config.max_retries => return Err(RetryError::Operation(err)),
            Err(_) => {}
        }

        let delay = config.delay_for_attempt(retry);
        retry += 1;
        debug!(
            retry,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Attempt failed, backing off"
        );

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
