//! Bounded retry for remote calls.
//!
//! One policy object replaces per-call-site retry loops. Only errors that
//! classify as transient or rate-limited are retried; everything else returns on
//! the first failure. Rate limiting backs off exponentially, transient failures
//! wait a fixed delay.

use crate::errors::{Error, ErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// How long to wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// `initial`, `2 * initial`, `4 * initial`, ... capped at `max`
    Exponential {
        /// Delay before the first retry
        initial: Duration,
        /// Upper bound on any single delay
        max: Duration,
    },
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }

    /// Longest delay this backoff ever produces.
    #[must_use]
    pub const fn ceiling(&self) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { max, .. } => max,
        }
    }
}

/// Attempt limit plus the delays to use between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay after a transient failure
    pub delay: Backoff,
    /// Delay after a rate-limit response
    pub rate_limit: Backoff,
}

impl RetryPolicy {
    /// Fixed delay for every kind of retryable failure.
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay: Backoff::Fixed(delay),
            rate_limit: Backoff::Fixed(delay),
        }
    }

    /// No waiting between attempts.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    /// Delay to apply after `error` ended attempt number `attempt`.
    ///
    /// A server `Retry-After` hint is honoured up to the rate-limit ceiling.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &Error) -> Duration {
        match error {
            Error::RateLimited { retry_after } => {
                let backoff = self.rate_limit.delay(attempt);
                retry_after
                    .map_or(backoff, |hint| hint.max(backoff))
                    .min(self.rate_limit.ceiling())
            }
            _ => self.delay.delay(attempt),
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` attempts have been made.
///
/// # Errors
/// Non-retryable errors are returned unchanged. When attempts run out the last
/// error is wrapped in [`Error::RetriesExhausted`].
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{operation} succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) if attempt >= max_attempts => {
                warn!("{operation} giving up after {attempt} attempts: {error}");
                return Err(Error::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: Box::new(error),
                });
            }
            Err(error) => {
                let wait = policy.delay_for(attempt, &error);
                let reason = if error.kind() == ErrorKind::RateLimited {
                    "rate limited"
                } else {
                    "transient failure"
                };
                warn!(
                    "{operation} attempt {attempt}/{max_attempts} failed ({reason}), retrying in {wait:?}: {error}"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}
