//! Permanent-storage client (ledger-backed, write-once store).
//!
//! Uploads go through a relay endpoint authenticated by a bearer token:
//! multipart for files, JSON for documents. Reads go straight to the
//! ledger gateway at `<gateway>/<identifier>`. The store has no listing
//! endpoint, so lookups are answered from the cache alone.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::identifier::{is_ipfs_cid, is_ledger_id};
use super::source::{Payload, PreparedUpload, UploadSource, prepare};
use super::traits::StorageProvider;
use crate::cache::EncryptedCache;
use crate::telemetry::MetricsCollector;
use crate::transport::{CircuitBreakerConfig, RetryPolicy, Transport, TransportConfig, json_body};
use crate::{MimirError, Result};

/// Provider name used in errors and metrics.
pub const PROVIDER: &str = "permanent";

/// Default ledger gateway for reads
const DEFAULT_GATEWAY_URL: &str = "https://arweave.net";

/// Default upload size limit: 50 MiB.
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Configuration for [`PermanentClient`].
#[derive(Clone)]
pub struct PermanentConfig {
    pub relay_url: String,
    pub token: String,
    pub gateway_url: String,
    pub max_upload_bytes: u64,
    /// Tags attached to every upload.
    pub tags: BTreeMap<String, String>,
    pub transport: TransportConfig,
}

impl std::fmt::Debug for PermanentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermanentConfig")
            .field("relay_url", &self.relay_url)
            .field("gateway_url", &self.gateway_url)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("tags", &self.tags)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl PermanentConfig {
    /// Config for the given relay and bearer token.
    pub fn new(relay_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            token: token.into(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            tags: BTreeMap::new(),
            transport: Self::default_transport(),
        }
    }

    /// Transport defaults for the relay.
    ///
    /// Uploads are slower (ledger settlement), so requests get a longer
    /// timeout; the relay is more lenient, so spacing has no jitter and
    /// retries back off from 1s.
    pub fn default_transport() -> TransportConfig {
        TransportConfig::new()
            .request_timeout(Duration::from_secs(60))
            .min_interval(Duration::from_millis(500))
            .no_jitter()
            .retry(
                RetryPolicy::new()
                    .max_retries(3)
                    .base_delay(Duration::from_secs(1))
                    .max_delay(Duration::from_secs(30)),
            )
            .circuit(CircuitBreakerConfig::new())
    }

    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    pub fn max_upload_bytes(mut self, n: u64) -> Self {
        self.max_upload_bytes = n;
        self
    }

    /// Add a tag sent with every upload.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

/// Client for the permanent store's upload relay and read gateway.
pub struct PermanentClient {
    config: PermanentConfig,
    transport: Transport,
    cache: Option<Arc<EncryptedCache>>,
}

impl PermanentClient {
    /// Build a client. Fails fast on a missing relay URL or token.
    pub fn new(config: PermanentConfig, metrics: Arc<MetricsCollector>) -> Result<Self> {
        if config.relay_url.trim().is_empty() {
            return Err(MimirError::Configuration(
                "permanent storage relay URL is required".into(),
            ));
        }
        if config.token.trim().is_empty() {
            return Err(MimirError::Configuration(
                "permanent storage bearer token is required".into(),
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

    /// Upload a JSON document through the relay.
    pub async fn upload_json(&self, data: &serde_json::Value, name: Option<&str>) -> Result<String> {
        let url = self.relay_url("/upload/json");
        let body = JsonUpload {
            data,
            name,
            content_type: "application/json",
            tags: &self.config.tags,
        };
        self
            .transport
            .execute(
                "upload",
                |http| http.post(&url).bearer_auth(&self.config.token).json(&body),
                parse_reply,
            )
            .await
    }

    /// Upload file bytes through the relay as multipart.
    pub async fn upload_file(
        &self,
        data: &[u8],
        file_name: &str,
        content_type: &str,
        name: Option<&str>,
    ) -> Result<String> {
        let url = self.relay_url("/upload/file");
        let tags = serde_json::to_string(&self.config.tags)?;
        Part::bytes(Vec::new())
            .mime_str(content_type)
            .map_err(|e| MimirError::validation(PROVIDER, format!("bad content type: {e}")))?;

        self
            .transport
            .execute(
                "upload",
                |http| {
                    let file = Part::bytes(data.to_vec())
                        .file_name(file_name.to_owned())
                        .mime_str(content_type)
                        .unwrap_or_else(|_| Part::bytes(data.to_vec()).file_name(file_name.to_owned()));
                    let mut form = Form::new().part("file", file).text("tags", tags.clone());
                    if let Some(name) = name {
                        form = form.text("name", name.to_owned());
                    }
                    http.post(&url).bearer_auth(&self.config.token).multipart(form)
                },
                parse_reply,
            )
            .await
    }

    fn relay_url(&self, path: &str) -> String {
        format!("{}{}", self.config.relay_url.trim_end_matches('/'), path)
    }

    fn record_rejection(&self, operation: &'static str, err: &MimirError) {
        self.transport
            .metrics()
            .record_rejection(PROVIDER, operation, err);
    }
}

#[async_trait]
impl StorageProvider for PermanentClient {
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
        let id = match &prepared {
            PreparedUpload::Json(value) => self.upload_json(value, logical_name).await?,
            PreparedUpload::File {
                data,
                file_name,
                content_type,
            } => {
                self.upload_file(data, file_name, content_type, logical_name)
                    .await?
            }
        };
        info!(id = %id, bytes = prepared.size(), "stored content permanently");

        if let (Some(cache), Some(name)) = (&self.cache, logical_name) {
            let mut metadata = BTreeMap::new();
            metadata.insert("provider".to_string(), PROVIDER.to_string());
            metadata.insert("content_type".to_string(), prepared.content_type().to_string());
            metadata.insert("size".to_string(), prepared.size().to_string());
            if let Err(e) = cache.put(name, &id, metadata) {
                warn!(name, error = %e, "uploaded but failed to update cache");
            }
        }
        Ok(id)
    }

    async fn download(&self, identifier: &str) -> Result<Payload> {
        if !self.is_valid_identifier(identifier) {
            let err = MimirError::validation(PROVIDER, format!("invalid identifier {identifier:?}"));
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
            "{}/{}",
            self.config.gateway_url.trim_end_matches('/'),
            identifier
        )
    }

    /// Ledger ids, plus IPFS CIDs for interop on reads.
    fn is_valid_identifier(&self, identifier: &str) -> bool {
        is_ledger_id(identifier) || is_ipfs_cid(identifier)
    }

    async fn lookup(&self, logical_name: &str) -> Result<Option<String>> {
        Ok(self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(logical_name))
            .map(|e| e.identifier))
    }
}

#[derive(Serialize)]
struct JsonUpload<'a> {
    data: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    content_type: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    tags: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RelayReply {
    #[serde(alias = "txId", alias = "tx_id")]
    id: String,
}

/// Decode a relay reply, rejecting ids that are not ledger ids.
async fn parse_reply(response: reqwest::Response) -> Result<String> {
    let reply: RelayReply = json_body(PROVIDER, response).await?;
    if !is_ledger_id(&reply.id) {
        return Err(MimirError::Provider {
            provider: PROVIDER.to_owned(),
            status: None,
            message: format!("relay returned malformed id {:?}", reply.id),
        });
    }
    Ok(reply.id)
}
