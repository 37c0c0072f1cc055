//! Bounded retries with exponential backoff for remote fetches.
//!
//! Rate limits and transient server errors are common when walking social
//! media APIs; callers classify each failure as a [`backoff::Error`] and this
//! wrapper caps the number of attempts on top of the backoff schedule.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backoff::exponential::{ExponentialBackoff, ExponentialBackoffBuilder};
use backoff::SystemClock;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound for any single wait, server hints included.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Doubling schedule from `base_delay` up to `max_delay`. Elapsed time is
    /// unbounded; `max_attempts` ends the loop instead.
    pub fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Runs `attempt` (given the 1-based attempt number) until it succeeds, fails
/// permanently or the policy's attempts run out. Returns the last error.
///
/// `retry_after` hints replace the backoff delay but are clamped to
/// `max_delay`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, backoff::Error<E>>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let max_delay = policy.max_delay;
    let mut number = 0;

    let operation = || {
        number += 1;
        let current = number;
        let fut = attempt(current);
        async move {
            match fut.await {
                Err(backoff::Error::Transient { err, .. }) if current >= max_attempts => {
                    warn!(
                        attempts = current,
                        error = %err,
                        "Giving up after transient failures"
                    );
                    Err(backoff::Error::Permanent(err))
                }
                Err(backoff::Error::Transient { err, retry_after }) => {
                    Err(backoff::Error::Transient {
                        err,
                        retry_after: retry_after.map(|hint| hint.min(max_delay)),
                    })
                }
                other => other,
            }
        }
    };

    let notify = |err: E, delay: Duration| {
        warn!(
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );
    };
    backoff::future::retry_notify(policy.backoff(), operation, notify).await
}
