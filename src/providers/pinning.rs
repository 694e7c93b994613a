//! Pinning-service client (Pinata-style REST API).
//!
//! Uploads JSON documents and files as pins, lists pins to rebuild the
//! cache, and reads content back through the IPFS gateway.
//! See: <https://docs.pinata.cloud/api-reference>

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::identifier::is_ipfs_cid;
use super::source::{Payload, PreparedUpload, UploadSource, prepare};
use super::traits::StorageProvider;
use crate::cache::{CacheEntry, EncryptedCache};
use crate::telemetry::MetricsCollector;
use crate::transport::{CircuitBreakerConfig, RetryPolicy, Transport, TransportConfig, json_body};
use crate::{MimirError, Result};

/// Provider name used in errors and metrics.
pub const PROVIDER: &str = "pinning";

/// Default base URL for the pinning API
const DEFAULT_BASE_URL: &str = "https://api.pinata.cloud";

/// Default IPFS gateway for reads
const DEFAULT_GATEWAY_URL: &str = "https://gateway.pinata.cloud";

/// Default upload size limit: 100 MiB.
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Rows requested per pin-list page (the API maximum).
const DEFAULT_PAGE_LIMIT: u32 = 1000;

/// Hard stop for pin-list paging.
const MAX_LIST_PAGES: u32 = 100;

/// Configuration for [`PinningClient`].
#[derive(Clone)]
pub struct PinningConfig {
    pub api_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub gateway_url: String,
    pub max_upload_bytes: u64,
    pub page_limit: u32,
    pub transport: TransportConfig,
}

impl std::fmt::Debug for PinningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinningConfig")
            .field("base_url", &self.base_url)
            .field("gateway_url", &self.gateway_url)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl PinningConfig {
    /// Config with the given key pair and the pinning service's defaults.
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            page_limit: DEFAULT_PAGE_LIMIT,
            transport: Self::default_transport(),
        }
    }

    /// Transport defaults for the pinning service.
    ///
    /// The service rate-limits aggressively, so requests are spaced one
    /// second apart plus 0.5–2s of jitter, and retries back off from 2s.
    pub fn default_transport() -> TransportConfig {
        TransportConfig::new()
            .request_timeout(Duration::from_secs(30))
            .min_interval(Duration::from_secs(1))
            .jitter(Duration::from_millis(500)..=Duration::from_secs(2))
            .retry(
                RetryPolicy::new()
                    .max_retries(5)
                    .base_delay(Duration::from_secs(2))
                    .max_delay(Duration::from_secs(60)),
            )
            .circuit(CircuitBreakerConfig::new())
    }

    /// Point the API at a different host (e.g. a wiremock server).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    pub fn max_upload_bytes(mut self, n: u64) -> Self {
        self.max_upload_bytes = n;
        self
    }

    pub fn page_limit(mut self, n: u32) -> Self {
        self.page_limit = n.max(1);
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// Client for the pinning service.
pub struct PinningClient {
    config: PinningConfig,
    transport: Transport,
    cache: Option<Arc<EncryptedCache>>,
}

impl PinningClient {
    /// Build a client. Fails fast on missing credentials.
    pub fn new(config: PinningConfig, metrics: Arc<MetricsCollector>) -> Result<Self> {
        if config.api_key.trim().is_empty() || config.secret_key.trim().is_empty() {
            return Err(MimirError::Configuration(
                "pinning service API key and secret are required".into(),
            ));
        }
        let transport = Transport::new(PROVIDER, &config.transport, metrics)?;
        Ok(Self {
            config,
            transport,
            cache: None,
        })
    }

    /// Attach the shared encrypted cache.
    pub fn with_cache(mut self, cache: Arc<EncryptedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Transport (exposes the circuit breaker state).
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Verify the key pair against the authentication-test endpoint.
    pub async fn test_authentication(&self) -> Result<()> {
        let url = self.api_url("/data/testAuthentication");
        self.transport
            .execute(
                "auth",
                |http| self.authorized(http.get(&url)),
                |_| async { Ok(()) },
            )
            .await
    }

    /// Pin a JSON document.
    pub async fn pin_json(
        &self,
        content: &serde_json::Value,
        name: Option<&str>,
    ) -> Result<PinResponse> {
        let url = self.api_url("/pinning/pinJSONToIPFS");
        let body = PinJsonRequest {
            pinata_content: content,
            pinata_metadata: PinMetadata::new(name),
        };
        self.transport
            .execute(
                "upload",
                |http| self.authorized(http.post(&url)).json(&body),
                parse_pin,
            )
            .await
    }

    /// Pin raw file bytes as a multipart upload.
    pub async fn pin_file(
        &self,
        data: &[u8],
        file_name: &str,
        content_type: &str,
        name: Option<&str>,
    ) -> Result<PinResponse> {
        let url = self.api_url("/pinning/pinFileToIPFS");
        let metadata = serde_json::to_string(&PinMetadata::new(name))?;
        // Fail on a bad MIME type before the first attempt.
        Part::bytes(Vec::new())
            .mime_str(content_type)
            .map_err(|e| MimirError::validation(PROVIDER, format!("bad content type: {e}")))?;

        self.transport
            .execute(
                "upload",
                |http| {
                    // Multipart bodies are single-use; rebuild per attempt.
                    let file = Part::bytes(data.to_vec())
                        .file_name(file_name.to_owned())
                        .mime_str(content_type)
                        .unwrap_or_else(|_| Part::bytes(data.to_vec()).file_name(file_name.to_owned()));
                    let form = Form::new()
                        .part("file", file)
                        .text("pinataMetadata", metadata.clone());
                    self.authorized(http.post(&url)).multipart(form)
                },
                parse_pin,
            )
            .await
    }

    /// List pinned content that carries a metadata name.
    pub async fn list_pins(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let limit = self.config.page_limit;
        for page in 0..MAX_LIST_PAGES {
            let url = self.api_url("/data/pinList");
            let offset = (page * limit).to_string();
            let limit_str = limit.to_string();
            let list: PinList = self
                .transport
                .execute(
                    "list",
                    |http| {
                        self.authorized(http.get(&url)).query(&[
                            ("status", "pinned"),
                            ("pageLimit", limit_str.as_str()),
                            ("pageOffset", offset.as_str()),
                        ])
                    },
                    |resp| json_body::<PinList>(PROVIDER, resp),
                )
                .await?;

            let rows = list.rows.len();
            entries.extend(list.rows.into_iter().filter_map(PinRow::into_entry));
            let seen = (page * limit) as u64 + rows as u64;
            if rows < limit as usize || list.count.is_some_and(|count| seen >= count) {
                break;
            }
        }
        debug!(count = entries.len(), "listed named pins");
        Ok(entries)
    }

    /// Merge the remote pin listing into the cache.
    ///
    /// Returns the number of entries merged; 0 when no cache is attached.
    pub async fn refresh_cache(&self) -> Result<usize> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };
        let pins = self.list_pins().await?;
        let merged = cache.merge_listing(pins)?;
        info!(merged, "refreshed cache from pin listing");
        Ok(merged)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("pinata_api_key", &self.config.api_key)
            .header("pinata_secret_api_key", &self.config.secret_key)
    }

    fn record_rejection(&self, operation: &'static str, err: &MimirError) {
        self.transport
            .metrics()
            .record_rejection(PROVIDER, operation, err);
    }
}

#[async_trait]
impl StorageProvider for PinningClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn upload(&self, source: UploadSource, logical_name: Option<&str>) -> Result<String> {
        let prepared = match prepare(PROVIDER, source, self.config.max_upload_bytes).await {
            Ok(p) => p,
            Err(e) => {
                self.record_rejection("upload", &e);
                return Err(e);
            }
        };
        let started = Instant::now();

        let pin = match &prepared {
            PreparedUpload::Json(value) => self.pin_json(value, logical_name).await?,
            PreparedUpload::File {
                data,
                file_name,
                content_type,
            } => {
                self.pin_file(data, file_name, content_type, logical_name)
                    .await?
            }
        };
        info!(
            cid = %pin.ipfs_hash,
            bytes = prepared.size(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pinned content"
        );

        if let (Some(cache), Some(name)) = (&self.cache, logical_name) {
            let mut metadata = BTreeMap::new();
            metadata.insert("provider".to_string(), PROVIDER.to_string());
            metadata.insert("content_type".to_string(), prepared.content_type().to_string());
            metadata.insert("size".to_string(), prepared.size().to_string());
            if let Some(ts) = &pin.timestamp {
                metadata.insert("pinned_at".to_string(), ts.clone());
            }
            if let Err(e) = cache.put(name, &pin.ipfs_hash, metadata) {
                warn!(name, error = %e, "uploaded but failed to update cache");
            }
        }
        Ok(pin.ipfs_hash)
    }

    async fn download(&self, identifier: &str) -> Result<Payload> {
        if !self.is_valid_identifier(identifier) {
            let err = MimirError::validation(PROVIDER, format!("invalid CID {identifier:?}"));
            self.record_rejection("download", &err);
            return Err(err);
        }
        let url = self.public_url(identifier);
        self.transport
            .execute(
                "download",
                |http| http.get(&url),
                |resp| Payload::from_response(PROVIDER, resp),
            )
            .await
    }

    fn public_url(&self, identifier: &str) -> String {
        format!(
            "{}/ipfs/{}",
            self.config.gateway_url.trim_end_matches('/'),
            identifier
        )
    }

    fn is_valid_identifier(&self, identifier: &str) -> bool {
        is_ipfs_cid(identifier)
    }

    async fn lookup(&self, logical_name: &str) -> Result<Option<String>> {
        let Some(cache) = &self.cache else {
            let pins = self.list_pins().await?;
            return Ok(pins
                .into_iter()
                .find(|e| e.name == logical_name)
                .map(|e| e.identifier));
        };
        if let Some(entry) = cache.get(logical_name) {
            return Ok(Some(entry.identifier));
        }
        if !cache.needs_update() {
            return Ok(None);
        }
        self.refresh_cache().await?;
        Ok(cache.get(logical_name).map(|e| e.identifier))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PinJsonRequest<'a> {
    pinata_content: &'a serde_json::Value,
    pinata_metadata: PinMetadata<'a>,
}

#[derive(Serialize)]
struct PinMetadata<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    keyvalues: BTreeMap<&'static str, &'static str>,
}

impl<'a> PinMetadata<'a> {
    fn new(name: Option<&'a str>) -> Self {
        let mut keyvalues = BTreeMap::new();
        keyvalues.insert("client", "mimir");
        Self { name, keyvalues }
    }
}

/// Decode a pin reply, rejecting identifiers that are not CIDs.
async fn parse_pin(response: reqwest::Response) -> Result<PinResponse> {
    let pin: PinResponse = json_body(PROVIDER, response).await?;
    if !is_ipfs_cid(&pin.ipfs_hash) {
        return Err(MimirError::Provider {
            provider: PROVIDER.to_owned(),
            status: None,
            message: format!("service returned malformed CID {:?}", pin.ipfs_hash),
        });
    }
    Ok(pin)
}

/// Reply to a successful pin.
#[derive(Debug, Clone, Deserialize)]
pub struct PinResponse {
    #[serde(rename = "IpfsHash")]
    pub ipfs_hash: String,
    #[serde(rename = "PinSize", default)]
    pub pin_size: Option<u64>,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct PinList {
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    rows: Vec<PinRow>,
}

#[derive(Deserialize)]
struct PinRow {
    ipfs_pin_hash: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    date_pinned: Option<String>,
    #[serde(default)]
    metadata: Option<PinRowMetadata>,
}

#[derive(Deserialize)]
struct PinRowMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    keyvalues: Option<BTreeMap<String, serde_json::Value>>,
}

impl PinRow {
    fn into_entry(self) -> Option<CacheEntry> {
        let meta = self.metadata?;
        let name = meta.name.filter(|n| !n.is_empty())?;
        if self.ipfs_pin_hash.is_empty() {
            return None;
        }
        let mut metadata: BTreeMap<String, String> = meta
            .keyvalues
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();
        metadata.insert("provider".to_string(), PROVIDER.to_string());
        if let Some(size) = self.size {
            metadata.insert("size".to_string(), size.to_string());
        }
        let mut entry = CacheEntry::new(name, self.ipfs_pin_hash).with_metadata(metadata);
        if let Some(pinned) = self
            .date_pinned
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            entry.last_updated = pinned.with_timezone(&Utc);
        }
        Some(entry)
    }
}
