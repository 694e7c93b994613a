//! In-process metrics collector.
//!
//! [`MetricsCollector`] keeps per-operation durations, per-error-type
//! counters and cache hit/miss counts for the lifetime of the process, and
//! mirrors each event to the `metrics` facade. It is constructed once and
//! shared by `Arc` between the transport, the cache and the batch uploader.
//!
//! Snapshots are written as JSON files, one per flush, into the configured
//! directory. Each flush truncates the duration samples to the most recent
//! [`MetricsConfig::max_samples`] to bound memory.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, ERRORS_TOTAL, REQUEST_DURATION_SECONDS, REQUESTS_TOTAL};
use crate::{MimirError, Result};

/// Operation label used for the `average_upload_time` figure.
const UPLOAD_OPERATION: &str = "upload";

/// Configuration for the metrics collector.
///
/// ```rust
/// # use mimir::telemetry::MetricsConfig;
/// # use std::time::Duration;
/// let config = MetricsConfig::new()
///     .dir("/tmp/mimir-metrics")
///     .flush_interval(Duration::from_secs(60))
///     .max_samples(500);
/// ```
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Directory snapshot files are written to. Default: `~/.cache/mimir/metrics`.
    pub dir: PathBuf,
    /// Interval between periodic flushes. Default: 1 hour.
    pub flush_interval: Duration,
    /// Duration samples kept per operation after a flush. Default: 1,000.
    pub max_samples: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            dir: default_metrics_dir(),
            flush_interval: Duration::from_secs(3600),
            max_samples: 1_000,
        }
    }
}

impl MetricsConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the snapshot directory.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Set the periodic flush interval.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the number of duration samples retained per operation.
    pub fn max_samples(mut self, n: usize) -> Self {
        self.max_samples = n;
        self
    }
}

/// Default snapshot directory: `~/.cache/mimir/metrics`.
fn default_metrics_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("mimir")
        .join("metrics")
}

/// Aggregate counters included in every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsTotals {
    pub operations: u64,
    pub uploads: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Point-in-time view of the collected metrics, as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Mean upload duration in seconds over the retained samples (0 if none).
    pub average_upload_time: f64,
    /// Mean duration in seconds per operation label.
    pub average_durations: BTreeMap<String, f64>,
    pub error_counts: BTreeMap<String, u64>,
    /// Hits over lookups, 0 when there were no lookups.
    pub cache_hit_ratio: f64,
    pub totals: MetricsTotals,
}

#[derive(Default)]
struct UploadMetrics {
    durations: HashMap<String, VecDeque<f64>>,
    error_counts: BTreeMap<String, u64>,
    operations: u64,
    uploads: u64,
    errors: u64,
}

/// Thread-safe collector of operation metrics.
pub struct MetricsCollector {
    config: MetricsConfig,
    state: Mutex<UploadMetrics>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl MetricsCollector {
    /// Create a collector with the given configuration.
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            state: Mutex::new(UploadMetrics::default()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Configuration this collector was built with.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Record the outcome of one logical operation.
    ///
    /// Recorded for failures as well as successes; `error` is `None` on
    /// success.
    pub fn record_operation(
        &self,
        provider: &str,
        operation: &'static str,
        elapsed: Duration,
        error: Option<&MimirError>,
    ) {
        let secs = elapsed.as_secs_f64();
        metrics::histogram!(REQUEST_DURATION_SECONDS,
            "provider" => provider.to_owned(),
            "operation" => operation,
        )
        .record(secs);

        let mut state = self.count(provider, operation, error);
        let samples = state.durations.entry(operation.to_owned()).or_default();
        samples.push_back(secs);
        // Keep memory bounded even if no flush ever runs.
        let hard_cap = self.config.max_samples.saturating_mul(2).max(1);
        while samples.len() > hard_cap {
            samples.pop_front();
        }
    }

    /// Record an operation refused before any request was sent.
    ///
    /// Counted like a failed operation but adds no duration sample, so
    /// local rejections do not skew the averages.
    pub fn record_rejection(&self, provider: &str, operation: &'static str, error: &MimirError) {
        self.count(provider, operation, Some(error));
    }

    fn count(
        &self,
        provider: &str,
        operation: &'static str,
        error: Option<&MimirError>,
    ) -> std::sync::MutexGuard<'_, UploadMetrics> {
        let status = if error.is_some() { "error" } else { "ok" };
        metrics::counter!(REQUESTS_TOTAL,
            "provider" => provider.to_owned(),
            "operation" => operation,
            "status" => status,
        )
        .increment(1);
        if let Some(e) = error {
            metrics::counter!(ERRORS_TOTAL,
                "provider" => provider.to_owned(),
                "kind" => e.kind(),
            )
            .increment(1);
        }

        let mut state = self.lock_state();
        state.operations += 1;
        if operation == UPLOAD_OPERATION {
            state.uploads += 1;
        }
        if let Some(e) = error {
            state.errors += 1;
            *state.error_counts.entry(e.kind().to_owned()).or_insert(0) += 1;
        }
        state
    }

    /// Count a cache hit.
    pub fn record_cache_hit(&self) {
        metrics::counter!(CACHE_HITS_TOTAL).increment(1);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a cache miss.
    pub fn record_cache_miss(&self) {
        metrics::counter!(CACHE_MISSES_TOTAL).increment(1);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Cache hits so far.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far.
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Error count for one error kind (see [`MimirError::kind`]).
    pub fn error_count(&self, kind: &str) -> u64 {
        self.lock_state().error_counts.get(kind).copied().unwrap_or(0)
    }

    /// Build a snapshot of the current figures without mutating them.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock_state();
        let cache_hits = self.cache_hits();
        let cache_misses = self.cache_misses();

        let average_durations: BTreeMap<String, f64> = state
            .durations
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(op, samples)| (op.clone(), mean(samples)))
            .collect();
        let lookups = cache_hits + cache_misses;

        MetricsSnapshot {
            timestamp: Utc::now(),
            average_upload_time: average_durations
                .get(UPLOAD_OPERATION)
                .copied()
                .unwrap_or(0.0),
            average_durations,
            error_counts: state.error_counts.clone(),
            cache_hit_ratio: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            totals: MetricsTotals {
                operations: state.operations,
                uploads: state.uploads,
                errors: state.errors,
                cache_hits,
                cache_misses,
            },
        }
    }

    /// Write a snapshot into the configured directory.
    pub fn flush(&self) -> Result<PathBuf> {
        self.flush_to_dir(&self.config.dir)
    }

    /// Write a snapshot into `dir` and truncate the duration samples.
    ///
    /// The file is named `metrics_<YYYYmmdd_HHMMSS_mmm>.json` (with a
    /// numeric suffix if that name is taken) and written via a temporary
    /// file and rename.
    pub fn flush_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        let snapshot = self.snapshot();
        std::fs::create_dir_all(dir)?;
        let stem = format!("metrics_{}", snapshot.timestamp.format("%Y%m%d_%H%M%S_%3f"));
        let mut path = dir.join(format!("{stem}.json"));
        let mut suffix = 1u32;
        while path.exists() {
            path = dir.join(format!("{stem}_{suffix}.json"));
            suffix += 1;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp_path, &path)?;

        let keep = self.config.max_samples;
        let mut state = self.lock_state();
        for samples in state.durations.values_mut() {
            while samples.len() > keep {
                samples.pop_front();
            }
        }
        info!(path = %path.display(), operations = snapshot.totals.operations, "metrics snapshot written");
        Ok(path)
    }

    /// Flush on a fixed interval until the returned task is aborted.
    ///
    /// The first flush happens one interval after the call. Requires a
    /// tokio runtime context.
    pub fn spawn_periodic_flush(self: &Arc<Self>) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        let period = collector.config.flush_interval;
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                if let Err(e) = collector.flush() {
                    warn!(error = %e, "failed to write metrics snapshot");
                }
            }
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, UploadMetrics> {
        // A poisoned lock only means another thread panicked mid-update;
        // the counters are still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

fn mean(samples: &VecDeque<f64>) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout_error() -> MimirError {
        MimirError::Timeout {
            provider: "pinning".into(),
            elapsed: None,
        }
    }

    #[test]
    fn records_errors_by_kind() {
        let collector = MetricsCollector::default();
        collector.record_operation("pinning", "upload", Duration::from_millis(10), None);
        collector.record_operation(
            "pinning",
            "upload",
            Duration::from_millis(10),
            Some(&timeout_error()),
        );

        assert_eq!(collector.error_count("timeout"), 1);
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.totals.operations, 2);
        assert_eq!(snapshot.totals.uploads, 2);
        assert_eq!(snapshot.totals.errors, 1);
    }

    #[test]
    fn average_upload_time_ignores_other_operations() {
        let collector = MetricsCollector::default();
        collector.record_operation("pinning", "upload", Duration::from_secs(1), None);
        collector.record_operation("pinning", "upload", Duration::from_secs(3), None);
        collector.record_operation("pinning", "download", Duration::from_secs(10), None);

        let snapshot = collector.snapshot();
        assert!((snapshot.average_upload_time - 2.0).abs() < 1e-9);
        assert!((snapshot.average_durations["download"] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn hit_ratio_is_zero_without_lookups() {
        let collector = MetricsCollector::default();
        assert_eq!(collector.snapshot().cache_hit_ratio, 0.0);

        collector.record_cache_hit();
        collector.record_cache_hit();
        collector.record_cache_hit();
        collector.record_cache_miss();
        assert!((collector.snapshot().cache_hit_ratio - 0.75).abs() < 1e-9);
    }

    #[test]
    fn flush_truncates_samples() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(MetricsConfig::new().dir(dir.path()).max_samples(2));
        for secs in [1, 2, 3, 4] {
            collector.record_operation("pinning", "upload", Duration::from_secs(secs), None);
        }

        let path = collector.flush().unwrap();
        let written: MetricsSnapshot =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!((written.average_upload_time - 2.5).abs() < 1e-9);

        // Only the two most recent samples (3s, 4s) survive the flush.
        assert!((collector.snapshot().average_upload_time - 3.5).abs() < 1e-9);
        assert_eq!(collector.snapshot().totals.uploads, 4);
    }

    #[test]
    fn rejections_count_errors_without_samples() {
        let collector = MetricsCollector::default();
        collector.record_operation("pinning", "upload", Duration::from_secs(2), None);
        let rejected = MimirError::validation("pinning", "upload is empty");
        collector.record_rejection("pinning", "upload", &rejected);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.error_counts["validation"], 1);
        assert_eq!(snapshot.totals.errors, 1);
        assert!((snapshot.average_upload_time - 2.0).abs() < 1e-9);
    }

    #[test]
    fn back_to_back_flushes_write_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let collector = MetricsCollector::new(MetricsConfig::new().dir(dir.path()));
        let first = collector.flush().unwrap();
        let second = collector.flush().unwrap();
        let third = collector.flush().unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }
}
