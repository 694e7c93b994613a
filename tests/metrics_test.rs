//! Tests for metrics emission and snapshot files.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;
use std::time::Duration;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use mimir::telemetry::{self, MetricsSnapshot};
use mimir::{
    MetricsCollector, MetricsConfig, MimirError, PinningClient, PinningConfig, RetryPolicy,
    StorageProvider, TransportConfig, UploadSource,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

fn client(server: &MockServer, retry: RetryPolicy) -> PinningClient {
    let transport = TransportConfig::new()
        .min_interval(Duration::ZERO)
        .no_jitter()
        .retry(retry);
    PinningClient::new(
        PinningConfig::new("k", "s")
            .base_url(server.uri())
            .transport(transport),
        Arc::new(MetricsCollector::default()),
    )
    .unwrap()
}

async fn upload(client: &PinningClient) -> mimir::Result<String> {
    client
        .upload(UploadSource::json(json!({"id": 1})), Some("x.json"))
        .await
}

// ============================================================================
// Facade emission
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn successful_request_records_metrics() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinning/pinJSONToIPFS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"IpfsHash": CID})))
        .mount(&server)
        .await;
    let client = client(&server, RetryPolicy::disabled());

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(upload(&client)))
    });
    assert!(result.is_ok());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::ERRORS_TOTAL), 0);
    assert!(
        has_histogram(&snapshot, telemetry::REQUEST_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn failed_request_records_error_metrics() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinning/pinJSONToIPFS"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let client = client(&server, RetryPolicy::disabled());

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(upload(&client)))
    });
    assert!(matches!(result, Err(MimirError::Auth { .. })));

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::ERRORS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn retried_request_records_retry_metrics() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinning/pinJSONToIPFS"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pinning/pinJSONToIPFS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"IpfsHash": CID})))
        .mount(&server)
        .await;
    let retry = RetryPolicy::new()
        .max_retries(2)
        .base_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .jitter(Duration::ZERO);
    let client = client(&server, retry);

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(upload(&client)))
    });
    assert_eq!(result.unwrap(), CID);

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 1);
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let collector = MetricsCollector::default();
    collector.record_operation("pinning", "upload", Duration::from_millis(3), None);
    collector.record_cache_hit();
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn snapshot_totals_reflect_recorded_operations() {
    let collector = MetricsCollector::default();
    let err = MimirError::from_status("pinning", 500, None, "down");
    collector.record_operation("pinning", "upload", Duration::from_secs(1), None);
    collector.record_operation("pinning", "upload", Duration::from_secs(3), Some(&err));
    collector.record_operation("pinning", "download", Duration::from_secs(2), None);
    collector.record_cache_hit();
    collector.record_cache_miss();

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.totals.operations, 3);
    assert_eq!(snapshot.totals.uploads, 2);
    assert_eq!(snapshot.totals.errors, 1);
    assert_eq!(snapshot.error_counts["provider"], 1);
    assert!((snapshot.average_upload_time - 2.0).abs() < 1e-9);
    assert!((snapshot.average_durations["download"] - 2.0).abs() < 1e-9);
    assert!((snapshot.cache_hit_ratio - 0.5).abs() < 1e-9);
}

#[test]
fn flush_writes_a_parseable_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let collector = MetricsCollector::new(MetricsConfig::new().dir(dir.path()));
    collector.record_operation("permanent", "upload", Duration::from_millis(250), None);

    let path = collector.flush().unwrap();
    assert_eq!(path.parent(), Some(dir.path()));
    let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.starts_with("metrics_"), "{file_name}");
    assert!(file_name.ends_with(".json"), "{file_name}");

    let written: MetricsSnapshot =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(written.totals.uploads, 1);
    assert!((written.average_upload_time - 0.25).abs() < 1e-9);
}

#[test]
fn flush_trims_samples_to_the_configured_bound() {
    let dir = tempfile::tempdir().unwrap();
    let collector = MetricsCollector::new(MetricsConfig::new().max_samples(2));
    for secs in [10, 1, 1] {
        collector.record_operation("pinning", "upload", Duration::from_secs(secs), None);
    }
    assert!((collector.snapshot().average_upload_time - 4.0).abs() < 1e-9);

    collector.flush_to_dir(dir.path()).unwrap();
    // Oldest sample dropped; counters untouched.
    let after = collector.snapshot();
    assert!((after.average_upload_time - 1.0).abs() < 1e-9);
    assert_eq!(after.totals.uploads, 3);
}

#[tokio::test(start_paused = true)]
async fn periodic_flush_writes_on_each_interval() {
    let dir = tempfile::tempdir().unwrap();
    let collector = Arc::new(MetricsCollector::new(
        MetricsConfig::new()
            .dir(dir.path())
            .flush_interval(Duration::from_secs(60)),
    ));
    let handle = collector.spawn_periodic_flush();

    tokio::time::sleep(Duration::from_secs(61)).await;
    handle.abort();

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("metrics_"))
        .collect();
    assert_eq!(files.len(), 1);
}
