//! The storage provider contract.
//!
//! Both backing stores implement [`StorageProvider`], so callers (and the
//! [`BatchUploader`](crate::BatchUploader)) can work against either one
//! through `Arc<dyn StorageProvider>` and handle failures uniformly via
//! [`MimirError`](crate::MimirError).
//!
//! # Example
//!
//! ```ignore
//! async fn publish(store: &dyn StorageProvider, doc: serde_json::Value) -> Result<String> {
//!     let id = store.upload(UploadSource::json(doc), Some("doc.json")).await?;
//!     println!("{}", store.public_url(&id));
//!     Ok(id)
//! }
//! ```

use async_trait::async_trait;

use super::source::{Payload, UploadSource};
use crate::Result;

/// A content-addressed store reachable over HTTP.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Provider name for errors, logs and metrics.
    fn name(&self) -> &str;

    /// Upload content and return its identifier.
    ///
    /// Fails with `Validation` before any network call when the input
    /// breaks size/type rules. On success, caches the identifier under
    /// `logical_name` when one is given.
    async fn upload(&self, source: UploadSource, logical_name: Option<&str>) -> Result<String>;

    /// Fetch content by identifier.
    ///
    /// Fails with `Validation` before any network call when the identifier
    /// is malformed, and with `NotFound` when the store has no such content.
    async fn download(&self, identifier: &str) -> Result<Payload>;

    /// Public read URL. Pure; malformed identifiers still produce a URL.
    fn public_url(&self, identifier: &str) -> String;

    /// Whether `identifier` matches this provider's identifier grammar.
    fn is_valid_identifier(&self, identifier: &str) -> bool;

    /// Resolve a logical name to an identifier.
    ///
    /// Consults the cache first; providers with a remote listing refresh the
    /// cache (when it is stale) and look again once.
    async fn lookup(&self, logical_name: &str) -> Result<Option<String>>;
}
