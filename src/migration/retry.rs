//! Per-call timeouts and exponential backoff for adapter calls
//!
//! Only errors whose [`is_retryable`](MemoryGraphError::is_retryable) is true
//! are retried. Everything else fails on the first attempt.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{MemoryGraphError, Result};

/// Default per-call timeout for adapter operations
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff configuration for transient failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per retry
    pub factor: f64,
    /// Random extra fraction of the delay (0.0 = none)
    pub jitter: f64,
    /// Upper bound on a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.25,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Same shape as the default with a different base delay
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (0-indexed)
    ///
    /// `base * factor^retry * (1 + r * jitter)` with `r` in `[0, 1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.factor.max(1.0).powi(retry as i32);
        let mut secs = self.base_delay.as_secs_f64() * exp;
        if self.jitter > 0.0 {
            let frac: f64 = rand::thread_rng().gen_range(0.0..1.0);
            secs += secs * frac * self.jitter;
        }
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `fut`, failing with `Timeout` if it does not finish within `limit`
pub async fn with_timeout<T, Fut>(operation: &str, limit: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MemoryGraphError::Timeout {
            operation: operation.to_string(),
            after_ms: limit.as_millis() as u64,
        }),
    }
}

/// Outcome of a retried call
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    /// Retries that were needed (0 = first attempt succeeded)
    pub retries: u32,
}

/// Call `operation` with a per-attempt timeout, retrying transient failures
///
/// When retries are exhausted the last error is escalated to a fatal
/// `TransientWrite` naming the operation.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    call_timeout: Duration,
    operation: &str,
    mut call: F,
) -> Result<Retried<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match with_timeout(operation, call_timeout, call()).await {
            Ok(value) => {
                if retry > 0 {
                    debug!(operation, retries = retry, "Call succeeded after retry");
                }
                return Ok(Retried {
                    value,
                    retries: retry,
                });
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if retry >= policy.max_retries => {
                warn!(operation, attempts = retry + 1, error = %e, "Retries exhausted");
                return Err(MemoryGraphError::TransientWrite(format!(
                    "{} failed after {} attempts: {}",
                    operation,
                    retry + 1,
                    e
                )));
            }
            Err(e) => {
                let delay = policy.delay_for(retry);
                warn!(
                    operation,
                    attempt = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
        }
    }
}
