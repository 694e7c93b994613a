//! Mimir - resilient client for content-addressed storage
//!
//! This crate uploads and downloads content to a pinning-style IPFS
//! service and a permanent ledger-style store while surviving unreliable
//! third-party APIs. Every request runs through a per-provider rate
//! limiter, circuit breaker and retry policy; uploads are remembered in an
//! encrypted on-disk cache; outcomes feed an in-process metrics collector.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mimir::{
//!     CacheConfig, CacheKey, EncryptedCache, MetricsCollector, PinningClient, PinningConfig,
//!     StorageProvider, UploadSource,
//! };
//!
//! #[tokio::main]
//! async fn main() -> mimir::Result<()> {
//!     let metrics = Arc::new(MetricsCollector::default());
//!     let cache = Arc::new(EncryptedCache::open(
//!         CacheConfig::new("/tmp/mimir/cache.bin"),
//!         &CacheKey::generate(),
//!         Arc::clone(&metrics),
//!     ));
//!     let client = PinningClient::new(PinningConfig::new("key", "secret"), metrics)?
//!         .with_cache(cache);
//!
//!     let cid = client
//!         .upload(UploadSource::json(serde_json::json!({"id": 1})), Some("x.json"))
//!         .await?;
//!     let payload = client.download(&cid).await?;
//!     println!("{} bytes from {}", payload.len(), client.public_url(&cid));
//!     Ok(())
//! }
//! ```
//!
//! See [`StorageStack`] for building everything from a config file and the
//! environment.

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod providers;
pub mod stack;
pub mod telemetry;
pub mod transport;

pub use batch::{BatchItem, BatchReport, BatchUploader};
pub use cache::{CacheConfig, CacheEntry, CacheKey, EncryptedCache};
pub use config::{Config, Credentials};
pub use error::{MimirError, Result};
pub use providers::{
    Payload, PermanentClient, PermanentConfig, PinningClient, PinningConfig, StorageProvider,
    UploadSource,
};
pub use stack::{ProviderKind, StorageStack};
pub use telemetry::{MetricsCollector, MetricsConfig, MetricsSnapshot};
pub use transport::{CircuitBreakerConfig, CircuitState, RetryPolicy, Transport, TransportConfig};

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
