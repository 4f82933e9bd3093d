//! # Retry Policy Module
//!
//! Bounded exponential backoff around a processor's `handle_event` call.
//!
//! Only errors the integration classifies as transient are retried; anything
//! else fails fast. Retries happen within a single dispatch and never re-run
//! the authentication, filter or validation gates.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy configuration for exponential backoff
///
/// # Examples
///
/// ```rust
/// use hookline_core::RetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: 3 attempts, 200ms base, 10s cap, 2.0x multiplier, no jitter
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.calculate_delay(0), Duration::from_millis(200));
/// assert_eq!(policy.calculate_delay(1), Duration::from_millis(400));
///
/// // Custom policy
/// let policy = RetryPolicy::new(5, Duration::from_millis(50), Duration::from_secs(1), 3.0);
/// assert_eq!(policy.calculate_delay(2), Duration::from_millis(450));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of handler invocations, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Exponential backoff multiplier (typically 2.0)
    pub backoff_multiplier: f64,

    /// Whether to randomise delays
    pub use_jitter: bool,

    /// Jitter range as a fraction of the delay (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            use_jitter: false,
            jitter_percent: 0.25,
        }
    }
}

/// Result of [`RetryPolicy::execute`] together with the number of calls made.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Create a new retry policy without jitter
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_multiplier,
            use_jitter: false,
            jitter_percent: 0.25,
        }
    }

    /// Policy that invokes the operation exactly once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Enable jitter with the given range (clamped to 0.0..=1.0)
    pub fn with_jitter(mut self, percent: f64) -> Self {
        self.use_jitter = true;
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Calculate the delay before retry number `retry` (0-based).
    ///
    /// `delay = min(base_delay * multiplier^retry, max_delay)`, then jittered
    /// when enabled.
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base_delay_nanos =
            self.base_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);

        let capped_delay_nanos = base_delay_nanos.min(self.max_delay.as_nanos() as f64);

        let final_delay_nanos = if self.use_jitter {
            Self::add_jitter(capped_delay_nanos, self.jitter_percent)
        } else {
            capped_delay_nanos
        };

        Duration::from_nanos(final_delay_nanos.max(0.0).round() as u64)
    }

    /// Check whether another call is allowed after `attempts` calls
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    ///
    /// `is_transient` decides whether an error may be retried. The last error
    /// is returned once attempts are exhausted.
    pub async fn execute<T, E, F, Fut, C>(&self, mut operation: F, is_transient: C) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let error = match operation().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                    }
                }
                Err(error) => error,
            };

            if !is_transient(&error) || !self.should_retry(attempts) {
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }

            let delay = self.calculate_delay(attempts - 1);
            warn!(
                attempt = attempts,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying after backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn add_jitter(delay_nanos: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_nanos * jitter_percent;
        if jitter_range <= 0.0 {
            return delay_nanos;
        }

        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        delay_nanos + jitter
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
