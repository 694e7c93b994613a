//! Per-provider circuit breaker.
//!
//! Closed: requests flow and consecutive transient failures are counted.
//! Once the count reaches the threshold the breaker opens and every request
//! is rejected with [`MimirError::CircuitOpen`] without touching the network.
//! When the cooldown has elapsed the next request is admitted as a single
//! probe (half-open): a success closes the breaker, a failure reopens it at
//! once. Other callers are rejected while the probe is in flight.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::telemetry;
use crate::{MimirError, Result};

/// Circuit breaker thresholds.
///
/// ```rust
/// # use mimir::CircuitBreakerConfig;
/// # use std::time::Duration;
/// let config = CircuitBreakerConfig::new()
///     .threshold(3)
///     .cooldown(Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker. Default: 5.
    pub threshold: u32,
    /// Time the breaker stays open before admitting a probe. Default: 300s.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold (minimum 1).
    pub fn threshold(mut self, n: u32) -> Self {
        self.threshold = n.max(1);
        self
    }

    /// Set the open-state cooldown.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitState {
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub is_open: bool,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { since: Instant },
    HalfOpen { probe_started: Instant },
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    consecutive_failures: u32,
}

/// Tracks consecutive failures for one provider and short-circuits calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    /// Decide whether a request may proceed.
    ///
    /// Returns `CircuitOpen` carrying the remaining cooldown when rejected.
    pub fn admit(&self) -> Result<()> {
        let now = Instant::now();
        let cooldown = self.config.cooldown;
        let mut inner = self.lock();
        match inner.phase {
            Phase::Closed => Ok(()),
            Phase::Open { since } => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed < cooldown {
                    return Err(self.rejection(cooldown - elapsed));
                }
                info!(provider = %self.provider, "circuit half-open, admitting probe");
                inner.phase = Phase::HalfOpen { probe_started: now };
                inner.consecutive_failures = 0;
                Ok(())
            }
            Phase::HalfOpen { probe_started } => {
                // A probe that never reported back (cancelled caller) is
                // replaced once it is older than the cooldown.
                let elapsed = now.saturating_duration_since(probe_started);
                if elapsed < cooldown {
                    return Err(self.rejection(cooldown - elapsed));
                }
                inner.phase = Phase::HalfOpen { probe_started: now };
                Ok(())
            }
        }
    }

    /// Record the outcome of an admitted request.
    ///
    /// Only transient errors count as failures; any other outcome proves the
    /// provider is reachable and resets the breaker.
    pub fn record<T>(&self, result: &Result<T>) {
        match result {
            Err(e) if e.is_transient() => self.record_failure(),
            _ => self.record_success(),
        }
    }

    /// Reset the failure count and close the breaker.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if !matches!(inner.phase, Phase::Closed) {
            info!(provider = %self.provider, "circuit closed");
        }
        inner.phase = Phase::Closed;
        inner.consecutive_failures = 0;
    }

    /// Count a failure, opening the breaker at the threshold.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let reopen = match inner.phase {
            Phase::HalfOpen { .. } => true,
            Phase::Closed => inner.consecutive_failures >= self.config.threshold,
            Phase::Open { .. } => false,
        };
        if reopen {
            warn!(
                provider = %self.provider,
                failures = inner.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit opened"
            );
            metrics::counter!(telemetry::CIRCUIT_OPENED_TOTAL,
                "provider" => self.provider.clone(),
            )
            .increment(1);
            inner.phase = Phase::Open { since: now };
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        let opened_at = match inner.phase {
            Phase::Open { since } => Some(since),
            _ => None,
        };
        CircuitState {
            consecutive_failures: inner.consecutive_failures,
            opened_at,
            is_open: opened_at.is_some(),
        }
    }

    /// Configuration this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn rejection(&self, remaining: Duration) -> MimirError {
        metrics::counter!(telemetry::CIRCUIT_REJECTIONS_TOTAL,
            "provider" => self.provider.clone(),
        )
        .increment(1);
        MimirError::CircuitOpen {
            provider: self.provider.clone(),
            retry_after: Some(remaining),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
