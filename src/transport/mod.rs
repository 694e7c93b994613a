//! HTTP transport shared by the provider clients.
//!
//! [`Transport`] composes the resilience layers around each logical
//! operation:
//!
//! ```text
//! circuit breaker admission
//!   └─ retry policy (transient errors only)
//!        └─ rate limiter wait ─ HTTP attempt ─ status mapping
//! metrics recorded for every outcome
//! ```
//!
//! The breaker counts logical operations, not attempts: one upload that
//! exhausts its retries is one failure. Every outbound attempt, retries
//! included, waits its turn on the rate limiter.

pub mod circuit;
pub mod rate_limit;
pub mod retry;

use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

use crate::telemetry::MetricsCollector;
use crate::{MimirError, Result};

/// Longest error body excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Resilience and timeout settings for one provider.
///
/// ```rust
/// # use mimir::{TransportConfig, RetryPolicy};
/// # use std::time::Duration;
/// let config = TransportConfig::new()
///     .request_timeout(Duration::from_secs(30))
///     .min_interval(Duration::from_secs(1))
///     .jitter(Duration::from_millis(500)..=Duration::from_secs(2))
///     .retry(RetryPolicy::new().max_retries(5));
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout applied to every single HTTP request. Default: 30s.
    pub request_timeout: Duration,
    /// Minimum delay between outbound requests. Default: 1s.
    pub min_interval: Duration,
    /// Extra random delay added to `min_interval`. Default: none.
    pub jitter: Option<RangeInclusive<Duration>>,
    pub retry: RetryPolicy,
    pub circuit: CircuitBreakerConfig,
    /// Upper bound for a whole logical operation, waits and retries
    /// included. Default: none.
    pub deadline: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            min_interval: Duration::from_secs(1),
            jitter: None,
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
            deadline: None,
        }
    }
}

impl TransportConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn jitter(mut self, range: RangeInclusive<Duration>) -> Self {
        self.jitter = Some(range);
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.jitter = None;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Rate-limited, circuit-broken, retrying HTTP client for one provider.
pub struct Transport {
    provider: String,
    http: Client,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    deadline: Option<Duration>,
    metrics: Arc<MetricsCollector>,
}

impl Transport {
    /// Build a transport; fails if the HTTP client cannot be constructed.
    pub fn new(
        provider: impl Into<String>,
        config: &TransportConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let provider = provider.into();
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                MimirError::Configuration(format!("failed to build HTTP client for {provider}: {e}"))
            })?;

        let mut limiter = RateLimiter::new(provider.clone(), config.min_interval);
        if let Some(range) = &config.jitter {
            limiter = limiter.with_jitter(range.clone());
        }

        Ok(Self {
            breaker: CircuitBreaker::new(provider.clone(), config.circuit.clone()),
            provider,
            http,
            limiter,
            retry: config.retry.clone(),
            deadline: config.deadline,
            metrics,
        })
    }

    /// Provider name used in errors, logs and metrics.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The provider's circuit breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Metrics collector shared with the rest of the stack.
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Run one logical operation through all resilience layers.
    ///
    /// `build` is called once per attempt to produce a fresh request;
    /// `parse` turns a successful response into the result. Non-success
    /// statuses never reach `parse`.
    pub async fn execute<T, B, P, Fut>(&self, operation: &'static str, build: B, parse: P) -> Result<T>
    where
        B: Fn(&Client) -> RequestBuilder,
        P: Fn(Response) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = self.run(operation, &build, &parse).await;
        self.metrics
            .record_operation(&self.provider, operation, start.elapsed(), result.as_ref().err());
        result
    }

    async fn run<T, B, P, Fut>(&self, operation: &'static str, build: &B, parse: &P) -> Result<T>
    where
        B: Fn(&Client) -> RequestBuilder,
        P: Fn(Response) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker.admit()?;

        let attempt = || async move {
            self.limiter.acquire().await;
            debug!(provider = %self.provider, operation, "sending request");
            let response = build(&self.http)
                .send()
                .await
                .map_err(|e| MimirError::from_reqwest(&self.provider, e))?;
            let response = check_status(&self.provider, response).await?;
            parse(response).await
        };
        let retrying = self.retry.execute_labeled(&self.provider, operation, attempt);

        let result = match self.deadline {
            Some(deadline) => with_deadline(&self.provider, deadline, retrying).await,
            None => retrying.await,
        };
        self.breaker.record(&result);
        result
    }
}

/// Bound a future by a caller-level deadline.
///
/// Elapsing drops (and so aborts) the in-flight work and yields
/// [`MimirError::Timeout`].
pub async fn with_deadline<T>(
    provider: &str,
    deadline: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(MimirError::Timeout {
            provider: provider.to_owned(),
            elapsed: Some(deadline),
        }),
    }
}

/// Pass successful responses through; map everything else to an error.
pub async fn check_status(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let url = response.url().path().to_owned();
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
    let message = if excerpt.is_empty() {
        format!("{status} for {url}")
    } else {
        format!("{status} for {url}: {excerpt}")
    };

    Err(MimirError::from_status(provider, status.as_u16(), retry_after, message))
}

/// Decode a JSON response body.
pub async fn json_body<T: DeserializeOwned>(provider: &str, response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| MimirError::from_reqwest(provider, e))
}
