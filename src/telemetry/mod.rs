//! Telemetry: metric name constants and the in-process collector.
//!
//! Every event is emitted through the `metrics` facade. Consumers install
//! their own recorder (e.g. prometheus, statsd); without one, the facade
//! calls are no-ops. [`MetricsCollector`] additionally keeps the figures in
//! memory so they can be snapshotted to disk.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `mimir_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: provider name ("pinning", "permanent")
//! - `operation`: operation invoked (e.g. "upload", "download", "list")
//! - `status`: outcome: "ok" or "error"
//! - `kind`: error type (see [`MimirError::kind`](crate::MimirError::kind))

pub mod collector;

pub use collector::{MetricsCollector, MetricsConfig, MetricsSnapshot, MetricsTotals};

/// Total logical operations completed through the transport.
///
/// Labels: `provider`, `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "mimir_requests_total";

/// Logical operation duration in seconds (including retries and waits).
///
/// Labels: `provider`, `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "mimir_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `provider`, `operation`.
pub const RETRIES_TOTAL: &str = "mimir_retries_total";

/// Total errors by type.
///
/// Labels: `provider`, `kind`.
pub const ERRORS_TOTAL: &str = "mimir_errors_total";

/// Total requests rejected by an open circuit breaker.
///
/// Labels: `provider`.
pub const CIRCUIT_REJECTIONS_TOTAL: &str = "mimir_circuit_rejections_total";

/// Total circuit breaker openings.
///
/// Labels: `provider`.
pub const CIRCUIT_OPENED_TOTAL: &str = "mimir_circuit_opened_total";

/// Time spent waiting on the rate limiter, in seconds.
///
/// Labels: `provider`.
pub const RATE_LIMIT_WAIT_SECONDS: &str = "mimir_rate_limit_wait_seconds";

/// Total encrypted cache hits.
pub const CACHE_HITS_TOTAL: &str = "mimir_cache_hits_total";

/// Total encrypted cache misses.
pub const CACHE_MISSES_TOTAL: &str = "mimir_cache_misses_total";
