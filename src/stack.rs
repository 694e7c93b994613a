//! Composition root: builds the shared collaborators once and wires them
//! into both provider clients. Metrics and the cache key are shared; each
//! provider gets its own encrypted cache blob.
//!
//! ```rust,no_run
//! use mimir::{Config, Credentials, ProviderKind, StorageStack, UploadSource};
//!
//! # async fn run() -> mimir::Result<()> {
//! let config = Config::load(None)?;
//! let stack = StorageStack::from_config(&config, &Credentials::from_env())?;
//! let store = stack.provider(ProviderKind::Pinning)?;
//! let id = store
//!     .upload(UploadSource::json(serde_json::json!({"id": 1})), Some("x.json"))
//!     .await?;
//! println!("{}", store.public_url(&id));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::batch::BatchUploader;
use crate::cache::EncryptedCache;
use crate::config::{BatchSettings, Config, Credentials, PERMANENT_RELAY_URL, PINATA_API_KEY};
use crate::providers::{
    PermanentClient, PermanentConfig, PinningClient, PinningConfig, StorageProvider,
};
use crate::telemetry::MetricsCollector;
use crate::{MimirError, Result};

/// Which backing store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Pinning,
    Permanent,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pinning => "pinning",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = MimirError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pinning" | "ipfs" => Ok(Self::Pinning),
            "permanent" | "arweave" => Ok(Self::Permanent),
            other => Err(MimirError::Configuration(format!(
                "unknown provider {other:?} (expected \"pinning\" or \"permanent\")"
            ))),
        }
    }
}

/// Metrics, caches and provider clients sharing one lifetime.
pub struct StorageStack {
    metrics: Arc<MetricsCollector>,
    pinning: Option<Configured<PinningClient>>,
    permanent: Option<Configured<PermanentClient>>,
    batch: BatchSettings,
}

/// A provider client and the cache it owns.
struct Configured<C> {
    client: Arc<C>,
    cache: Arc<EncryptedCache>,
}

impl StorageStack {
    /// Build the stack.
    ///
    /// Each provider is built when its credentials are present. Fails when
    /// credentials are half-set, a setting is invalid, or no provider is
    /// configured at all.
    pub fn from_config(config: &Config, credentials: &Credentials) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new(config.metrics.to_metrics_config()));
        let key = credentials.cache_key(&config.cache)?;
        let open_cache = |kind: ProviderKind| {
            Arc::new(EncryptedCache::open(
                config.cache.to_cache_config(kind.as_str()),
                &key,
                Arc::clone(&metrics),
            ))
        };

        let pinning = match credentials.pinning()? {
            Some((api_key, secret_key)) => {
                let settings = &config.pinning;
                let mut pinning = PinningConfig::new(api_key, secret_key)
                    .transport(settings.apply_transport(PinningConfig::default_transport())?);
                if let Some(url) = &settings.base_url {
                    pinning = pinning.base_url(url);
                }
                if let Some(url) = &settings.gateway_url {
                    pinning = pinning.gateway_url(url);
                }
                if let Some(n) = settings.max_upload_bytes {
                    pinning = pinning.max_upload_bytes(n);
                }
                let cache = open_cache(ProviderKind::Pinning);
                let client = PinningClient::new(pinning, Arc::clone(&metrics))?
                    .with_cache(Arc::clone(&cache));
                Some(Configured {
                    client: Arc::new(client),
                    cache,
                })
            }
            None => None,
        };

        let permanent = match credentials.permanent()? {
            Some((relay_url, token)) => {
                let settings = &config.permanent;
                let mut permanent = PermanentConfig::new(relay_url, token)
                    .transport(settings.apply_transport(PermanentConfig::default_transport())?);
                if let Some(url) = &settings.gateway_url {
                    permanent = permanent.gateway_url(url);
                }
                if let Some(n) = settings.max_upload_bytes {
                    permanent = permanent.max_upload_bytes(n);
                }
                let cache = open_cache(ProviderKind::Permanent);
                let client = PermanentClient::new(permanent, Arc::clone(&metrics))?
                    .with_cache(Arc::clone(&cache));
                Some(Configured {
                    client: Arc::new(client),
                    cache,
                })
            }
            None => None,
        };

        if pinning.is_none() && permanent.is_none() {
            return Err(MimirError::Configuration(format!(
                "no storage provider configured; set {PINATA_API_KEY} or {PERMANENT_RELAY_URL}"
            )));
        }
        info!(
            pinning = pinning.is_some(),
            permanent = permanent.is_some(),
            pinning_cached = pinning.as_ref().map_or(0, |p| p.cache.len()),
            permanent_cached = permanent.as_ref().map_or(0, |p| p.cache.len()),
            "storage stack ready"
        );

        Ok(Self {
            metrics,
            pinning,
            permanent,
            batch: config.batch.clone(),
        })
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// The cache owned by `kind`'s client.
    pub fn cache(&self, kind: ProviderKind) -> Result<Arc<EncryptedCache>> {
        let cache = match kind {
            ProviderKind::Pinning => self.pinning.as_ref().map(|p| &p.cache),
            ProviderKind::Permanent => self.permanent.as_ref().map(|p| &p.cache),
        };
        cache.cloned().ok_or_else(|| not_configured(kind))
    }

    /// The pinning client, if its credentials were supplied.
    pub fn pinning(&self) -> Result<Arc<PinningClient>> {
        self.pinning
            .as_ref()
            .map(|p| Arc::clone(&p.client))
            .ok_or_else(|| not_configured(ProviderKind::Pinning))
    }

    /// The permanent-storage client, if its credentials were supplied.
    pub fn permanent(&self) -> Result<Arc<PermanentClient>> {
        self.permanent
            .as_ref()
            .map(|p| Arc::clone(&p.client))
            .ok_or_else(|| not_configured(ProviderKind::Permanent))
    }

    /// A provider as a trait object.
    pub fn provider(&self, kind: ProviderKind) -> Result<Arc<dyn StorageProvider>> {
        let provider: Arc<dyn StorageProvider> = match kind {
            ProviderKind::Pinning => self.pinning()?,
            ProviderKind::Permanent => self.permanent()?,
        };
        Ok(provider)
    }

    /// A batch uploader over `kind`, sized from `[batch]`.
    pub fn batch_uploader(&self, kind: ProviderKind) -> Result<BatchUploader> {
        let mut uploader = BatchUploader::new(self.provider(kind)?);
        if let Some(n) = self.batch.workers {
            uploader = uploader.workers(n);
        }
        if let Some(secs) = self.batch.deadline_secs {
            uploader = uploader.deadline(Duration::from_secs(secs));
        }
        Ok(uploader)
    }
}

fn not_configured(kind: ProviderKind) -> MimirError {
    MimirError::Configuration(format!("{kind} provider is not configured"))
}
