//! Full stack scenarios: upload, download and lookup through every
//! resilience layer against a mock pinning service.

use std::sync::Arc;
use std::time::Duration;

use mimir::{
    CacheConfig, CacheKey, CircuitBreakerConfig, EncryptedCache, MetricsCollector, MimirError,
    PinningClient, PinningConfig, RetryPolicy, StorageProvider, TransportConfig, UploadSource,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

struct Stack {
    client: PinningClient,
    metrics: Arc<MetricsCollector>,
    _dir: TempDir,
}

fn stack(server: &MockServer, transport: TransportConfig) -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let metrics = Arc::new(MetricsCollector::default());
    let cache = Arc::new(EncryptedCache::open(
        CacheConfig::new(dir.path().join("cache.bin")),
        &CacheKey::generate(),
        Arc::clone(&metrics),
    ));
    let client = PinningClient::new(
        PinningConfig::new("k", "s")
            .base_url(server.uri())
            .gateway_url(server.uri())
            .transport(transport),
        Arc::clone(&metrics),
    )
    .unwrap()
    .with_cache(cache);
    Stack {
        client,
        metrics,
        _dir: dir,
    }
}

fn quick() -> TransportConfig {
    TransportConfig::new()
        .min_interval(Duration::ZERO)
        .no_jitter()
        .retry(RetryPolicy::disabled())
}

#[tokio::test]
async fn upload_download_and_cached_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinning/pinJSONToIPFS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"IpfsHash": CID})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/ipfs/{CID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/pinList"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
        .expect(0)
        .mount(&server)
        .await;

    let s = stack(&server, quick());
    let id = s
        .client
        .upload(UploadSource::json(json!({"id": 1})), Some("x.json"))
        .await
        .unwrap();
    assert_eq!(id, CID);

    let payload = s.client.download(&id).await.unwrap();
    assert_eq!(payload.json::<serde_json::Value>().unwrap(), json!({"id": 1}));

    assert_eq!(s.client.lookup("x.json").await.unwrap(), Some(CID.to_string()));
    assert_eq!(s.metrics.cache_hits(), 1);

    let snapshot = s.metrics.snapshot();
    assert_eq!(snapshot.totals.uploads, 1);
    assert_eq!(snapshot.totals.errors, 0);
}

#[tokio::test]
async fn breaker_opens_after_threshold_and_rejects_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinning/pinJSONToIPFS"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(2)
        .mount(&server)
        .await;

    let transport = quick().circuit(
        CircuitBreakerConfig::new()
            .threshold(2)
            .cooldown(Duration::from_secs(60)),
    );
    let s = stack(&server, transport);
    let doc = || UploadSource::json(json!({"id": 1}));

    for _ in 0..2 {
        let err = s.client.upload(doc(), Some("x.json")).await.unwrap_err();
        assert_eq!(err.kind(), "provider");
    }
    assert!(s.client.transport().breaker().state().is_open);

    let err = s.client.upload(doc(), Some("x.json")).await.unwrap_err();
    assert!(matches!(err, MimirError::CircuitOpen { .. }));
    assert_eq!(s.metrics.error_count("circuit_open"), 1);
    assert_eq!(s.metrics.error_count("provider"), 2);
}

#[tokio::test]
async fn operation_deadline_yields_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/ipfs/{CID}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let s = stack(&server, quick().deadline(Duration::from_millis(200)));
    let err = s.client.download(CID).await.unwrap_err();
    assert!(matches!(err, MimirError::Timeout { .. }), "got {err:?}");
    assert_eq!(s.metrics.error_count("timeout"), 1);
}

#[tokio::test]
async fn client_errors_do_not_trip_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pinning/pinJSONToIPFS"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&server)
        .await;

    let transport = quick().circuit(CircuitBreakerConfig::new().threshold(2));
    let s = stack(&server, transport);
    for _ in 0..3 {
        let err = s
            .client
            .upload(UploadSource::json(json!({"id": 1})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MimirError::Auth { .. }));
    }
    assert!(!s.client.transport().breaker().state().is_open);
}
