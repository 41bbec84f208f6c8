//! Bounded retry with exponential backoff
//!
//! Used for transient geocoding service errors. The attempt budget counts
//! the first try.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If it reports `Attempt::Done`, return the value
//! 3. If it reports `Attempt::Retry`:
//!    a. If attempts remain: log WARN, sleep for the backoff, double it (capped), retry
//!    b. Otherwise: log ERROR, return `RetryOutcome::Exhausted`

use std::future::Future;
use std::time::Duration;
use wnv_common::config::GeocoderConfig;

/// What a single attempt reported
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    /// Final answer, success or deterministic failure
    Done(T),
    /// Retriable error with a description
    Retry(String),
}

/// What the retry loop ended with
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Completed { value: T, attempts: u32 },
    Exhausted { last_error: String, attempts: u32 },
}

/// Attempt budget and backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    pub fn from_config(config: &GeocoderConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Delay after the given failed attempt (1-based): initial × 2^(attempt-1), capped
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.initial_backoff.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250), Duration::from_millis(4_000))
    }
}

/// Run `operation` until it reports `Done` or the attempt budget is spent
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "geocode")
/// * `policy` - Attempt budget and backoff curve
/// * `operation` - Async closure receiving the 1-based attempt number
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        match operation(attempt).await {
            Attempt::Done(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return RetryOutcome::Completed {
                    value,
                    attempts: attempt,
                };
            }
            Attempt::Retry(error) => {
                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %error,
                        "Operation failed: retry budget exhausted"
                    );
                    return RetryOutcome::Exhausted {
                        last_error: error,
                        attempts: attempt,
                    };
                }

                let backoff = policy.backoff_after(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    remaining = policy.max_attempts - attempt,
                    error = %error,
                    "Transient failure, will retry after backoff"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}
