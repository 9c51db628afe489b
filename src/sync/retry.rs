//! Retry executor for handling transient failures with exponential backoff
//!
//! This module provides a retry mechanism with configurable backoff strategy,
//! jitter, and an elapsed-time budget for handling temporary failures
//! gracefully. Waits between attempts are cancellable.

use crate::config::RetryConfig;
use crate::error::{RetryError, RetryableError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Immutable backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// First wait between attempts
    pub initial_interval: Duration,
    /// Growth factor applied after every attempt
    pub multiplier: f64,
    /// Upper bound for a single wait (before jitter)
    pub max_interval: Duration,
    /// Stop once this much time has passed since the first attempt
    pub max_elapsed_time: Duration,
    /// Randomization factor: each wait lands in `interval * (1 ± jitter)`
    pub jitter: f64,
    /// Optional cap on retries after the first attempt
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_interval: Duration::from_secs(config.initial_interval_secs),
            multiplier: config.multiplier,
            max_interval: Duration::from_secs(config.max_interval_secs),
            max_elapsed_time: Duration::from_secs(config.max_elapsed_secs),
            jitter: config.jitter,
            max_retries: config.max_retries,
        }
    }
}

impl RetryPolicy {
    /// Start a fresh backoff sequence
    pub fn backoff(&self) -> Backoff {
        Backoff {
            current: self.initial_interval,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            jitter: self.jitter,
        }
    }
}

/// Mutable state of one backoff sequence
///
/// Created per retry loop by [`RetryPolicy::backoff`], never shared.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    multiplier: f64,
    max_interval: Duration,
    jitter: f64,
}

impl Backoff {
    /// Next wait, advancing the sequence
    pub fn next_interval(&mut self) -> Duration {
        let base = self.current;

        let grown = base.as_secs_f64() * self.multiplier;
        self.current = if grown >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(grown)
        };

        randomize(base, self.jitter)
    }
}

/// Spread `interval` uniformly over `interval * (1 ± jitter)`
fn randomize(interval: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || interval.is_zero() {
        return interval;
    }
    let secs = interval.as_secs_f64();
    let delta = secs * jitter;
    let value = rand::thread_rng().gen_range((secs - delta)..=(secs + delta));
    Duration::from_secs_f64(value.max(0.0))
}

/// Retry executor with exponential backoff support
#[derive(Debug, Clone)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    /// Create a new RetryManager with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Create a RetryManager with default policy
    pub fn with_defaults() -> Self {
        Self::new(RetryPolicy::default())
    }

    /// Execute an async operation with retry logic
    ///
    /// The operation is retried while it returns a retryable error and the
    /// next wait still fits into `max_elapsed_time` (and `max_retries`, if
    /// set). Cancelling `cancel` aborts a pending wait immediately.
    ///
    /// # Arguments
    ///
    /// * `cancel` - Token of the enclosing execution context
    /// * `operation` - A closure that returns a Future with Result<T, E>
    ///
    /// # Returns
    ///
    /// The result of the operation, or a [`RetryError`] carrying the last error
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let started = Instant::now();
        let mut backoff = self.policy.backoff();
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts });
            }

            attempts += 1;
            let err = match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(attempts, error = %err, "Non-retryable error, giving up");
                return Err(RetryError::Permanent(err));
            }

            let elapsed = started.elapsed();
            let wait = backoff.next_interval();
            let retries_exhausted = self
                .policy
                .max_retries
                .is_some_and(|max| attempts > max);

            if retries_exhausted || elapsed + wait > self.policy.max_elapsed_time {
                warn!(
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    max_elapsed_ms = self.policy.max_elapsed_time.as_millis() as u64,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts,
                    elapsed,
                    last: err,
                });
            }

            debug!(
                attempt = attempts,
                backoff_ms = wait.as_millis() as u64,
                error = %err,
                "Retrying after transient error"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(attempts, "Retry wait cancelled");
                    return Err(RetryError::Cancelled { attempts });
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Get the retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}
