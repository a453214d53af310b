//! Bounded retry with exponential backoff.
//!
//! Every retried operation in the trial lifecycle carries its own
//! `attempts_remaining` counter on the trial. `RetryPolicy::run_bounded`
//! drives one such counter: a success forces it to zero, a transient failure
//! decrements it, a permanent failure exhausts it immediately, and a
//! cancellation leaves it untouched.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::models::RetryConfig;
use crate::domain::ports::errors::{ClusterError, MetricError, SetupError};

/// Error classification used by the retry loop.
pub trait Retryable {
    /// Retrying the same call may succeed
    fn is_transient(&self) -> bool;

    /// The call was abandoned because the trial was cancelled
    fn is_cancelled(&self) -> bool;
}

impl Retryable for ClusterError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl Retryable for MetricError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Cluster(ClusterError::Cancelled))
    }
}

impl Retryable for SetupError {
    fn is_transient(&self) -> bool {
        false
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result of driving one bounded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome<T, E> {
    /// Succeeded; the counter is now zero
    Succeeded(T),
    /// Transient failures used up the counter
    Exhausted(E),
    /// Permanent failure; the counter was forced to zero
    Rejected(E),
    /// Cancelled mid-flight; the counter is unchanged by the cancelled attempt
    Cancelled,
    /// The counter was already zero, nothing was attempted
    Skipped,
}

/// Retry interval and backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// A policy that waits a fixed, jitter-free interval (tests, polling).
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_backoff: interval,
            max_backoff: interval,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Fresh backoff schedule with no elapsed-time cutoff.
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.jitter)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Sleep for the next interval; returns false if cancelled first.
    pub async fn pause(&self, schedule: &mut ExponentialBackoff, cancel: &CancellationToken) -> bool {
        let delay = schedule.next_backoff().unwrap_or(self.max_backoff);
        tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    /// Drive `operation` against an attempt counter.
    pub async fn run_bounded<T, E, F, Fut>(
        &self,
        attempts: &mut u32,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> AttemptOutcome<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if *attempts == 0 {
            return AttemptOutcome::Skipped;
        }

        let mut schedule = self.schedule();
        loop {
            if cancel.is_cancelled() {
                return AttemptOutcome::Cancelled;
            }
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return AttemptOutcome::Cancelled,
                result = operation() => result,
            };

            match result {
                Ok(value) => {
                    *attempts = 0;
                    return AttemptOutcome::Succeeded(value);
                }
                Err(err) if err.is_cancelled() => return AttemptOutcome::Cancelled,
                Err(err) if !err.is_transient() => {
                    debug!(error = %err, "permanent error, not retrying");
                    *attempts = 0;
                    return AttemptOutcome::Rejected(err);
                }
                Err(err) => {
                    *attempts = attempts.saturating_sub(1);
                    if *attempts == 0 {
                        warn!(error = %err, "attempts exhausted");
                        return AttemptOutcome::Exhausted(err);
                    }
                    warn!(error = %err, attempts_remaining = *attempts, "transient error, retrying");
                    if !self.pause(&mut schedule, cancel).await {
                        return AttemptOutcome::Cancelled;
                    }
                }
            }
        }
    }
}
