//! Retry policy with exponential backoff.
//!
//! [`RetryPolicy`] wraps one logical operation (a zero-argument closure
//! returning a future) and re-runs it on transient errors only, as
//! classified by [`MimirError::is_transient()`]. Validation, credential and
//! not-found errors are returned after a single attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::telemetry;
use crate::Result;

/// Retry behaviour for transient errors.
///
/// Delay before retry `n` (0-indexed) is `base_delay * 2^n`, capped at
/// `max_delay`, plus a uniform jitter in `[0, jitter)`. A `retry_after` hint
/// from a rate-limit response takes precedence over the computed backoff,
/// but is also capped at `max_delay`.
///
/// ```rust
/// # use mimir::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new()
///     .max_retries(5)
///     .base_delay(Duration::from_secs(2))
///     .jitter(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. 0 = no retry. Default: 3.
    pub max_retries: u32,
    /// Base delay before the first retry. Default: 1s.
    pub base_delay: Duration,
    /// Maximum backoff between retries (before jitter). Default: 60s.
    pub max_delay: Duration,
    /// Upper bound of the uniform random jitter. Default: 1s.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the number of retries after the initial attempt.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum backoff between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter bound. `Duration::ZERO` disables jitter.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff for a given retry number (0-indexed), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Delay actually slept before retry `attempt`.
    ///
    /// A `retry_after` hint replaces the computed backoff; jitter is added
    /// either way. The hint never exceeds `max_delay`.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = match retry_after {
            Some(hint) => hint.min(self.max_delay),
            None => self.delay_for_attempt(attempt),
        };
        base + self.sample_jitter()
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max = self.jitter.as_secs_f64();
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..max))
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// Makes at most `max_retries + 1` attempts. Permanent errors are
    /// returned immediately; exhausting retries returns the last error.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_labeled("unknown", "unknown", operation).await
    }

    /// [`execute`](Self::execute) with provider/operation labels for logs
    /// and metrics.
    pub async fn execute_labeled<F, Fut, T>(
        &self,
        provider: &str,
        operation_name: &'static str,
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.effective_delay(attempt, e.retry_after());
                    metrics::counter!(telemetry::RETRIES_TOTAL,
                        "provider" => provider.to_owned(),
                        "operation" => operation_name,
                    )
                    .increment(1);
                    warn!(
                        provider,
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
