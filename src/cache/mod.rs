//! Encrypted upload cache.
//!
//! - [`EncryptedCache`] maps a caller's logical file name to the content
//!   identifier it was uploaded as, plus metadata. It is persisted as one
//!   AES-256-GCM blob, bounded by entry count (oldest `last_updated` evicted
//!   first), and refreshed in bulk from a provider's remote listing when
//!   older than its refresh interval.
//!
//! - [`cipher`] holds the key handling and blob encryption.

pub mod cipher;
pub mod encrypted;

pub use cipher::{CacheCipher, CacheKey};
pub use encrypted::{CacheConfig, CacheEntry, EncryptedCache, default_cache_path};
