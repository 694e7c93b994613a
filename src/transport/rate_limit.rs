//! Minimum-interval rate limiter with optional jitter.
//!
//! One [`RateLimiter`] per provider instance. Each outbound request first
//! calls [`RateLimiter::acquire`], which sleeps until `min_interval` (plus a
//! random jitter, when configured) has passed since the previous request
//! was released. The timestamp is taken after the wait, not after the
//! response, so concurrent callers queue on wait time rather than on
//! response latency.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::telemetry;

/// Serializes outbound requests to one provider.
#[derive(Debug)]
pub struct RateLimiter {
    provider: String,
    min_interval: Duration,
    jitter: Option<RangeInclusive<Duration>>,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter enforcing `min_interval` between requests.
    pub fn new(provider: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            provider: provider.into(),
            min_interval,
            jitter: None,
            last_request: Mutex::new(None),
        }
    }

    /// Add a uniform random jitter drawn from `range` on top of the interval.
    pub fn with_jitter(mut self, range: RangeInclusive<Duration>) -> Self {
        self.jitter = Some(range);
        self
    }

    /// Minimum interval between requests, without jitter.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for this caller's turn, returning the time spent waiting.
    ///
    /// The lock is held across the sleep, so concurrent callers are released
    /// one interval apart.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_request.lock().await;
        let started = Instant::now();
        if let Some(previous) = *last {
            let interval = self.min_interval + self.sample_jitter();
            let elapsed = started.saturating_duration_since(previous);
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        let now = Instant::now();
        *last = Some(now);
        let waited = now.saturating_duration_since(started);
        metrics::histogram!(telemetry::RATE_LIMIT_WAIT_SECONDS,
            "provider" => self.provider.clone(),
        )
        .record(waited.as_secs_f64());
        waited
    }

    fn sample_jitter(&self) -> Duration {
        match &self.jitter {
            Some(range) if range.start() < range.end() => {
                let (lo, hi) = (range.start().as_secs_f64(), range.end().as_secs_f64());
                Duration::from_secs_f64(rand::thread_rng().gen_range(lo..=hi))
            }
            Some(range) => *range.start(),
            None => Duration::ZERO,
        }
    }
}
