//! Persistent, encrypted name → identifier cache.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cipher::{CacheCipher, CacheKey};
use crate::telemetry::MetricsCollector;
use crate::{MimirError, Result};

/// One cached upload, keyed by the caller's logical file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: String,
    pub identifier: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

impl CacheEntry {
    /// Entry stamped with the current time.
    pub fn new(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
            metadata: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Configuration for the encrypted cache.
///
/// ```rust
/// # use mimir::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new("/tmp/mimir/cache.bin")
///     .max_entries(500)
///     .refresh_interval(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// File holding the encrypted blob.
    pub path: PathBuf,
    /// Maximum number of entries kept. Default: 1,000.
    pub max_entries: usize,
    /// Age after which a bulk refresh from the remote listing is due.
    /// Default: 30s.
    pub refresh_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(default_cache_path())
    }
}

impl CacheConfig {
    /// Config for the blob at `path` with default limits.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_entries: 1_000,
            refresh_interval: Duration::from_secs(30),
        }
    }

    /// Set the maximum number of entries (minimum 1).
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n.max(1);
        self
    }

    /// Set the bulk refresh interval.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }
}

/// Default blob path: `~/.cache/mimir/cache.bin`.
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("mimir")
        .join("cache.bin")
}

/// Plaintext layout of the persisted blob.
#[derive(Default, Serialize, Deserialize)]
struct PersistedCache {
    files: BTreeMap<String, CacheEntry>,
    last_update: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    last_bulk_update: Option<DateTime<Utc>>,
    newest: Option<DateTime<Utc>>,
}

impl CacheStore {
    fn from_persisted(persisted: PersistedCache) -> Self {
        let newest = persisted.files.values().map(|e| e.last_updated).max();
        Self {
            entries: persisted.files.into_iter().collect(),
            last_bulk_update: persisted.last_update,
            newest,
        }
    }

    fn to_persisted(&self) -> PersistedCache {
        PersistedCache {
            files: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            last_update: self.last_bulk_update,
        }
    }

    /// Current time, nudged past the newest stamp so eviction order is total.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.newest {
            Some(newest) if now <= newest => newest + TimeDelta::microseconds(1),
            _ => now,
        };
        self.newest = Some(stamp);
        stamp
    }

    fn upsert(&mut self, entry: CacheEntry) {
        if self.newest.is_none_or(|n| entry.last_updated > n) {
            self.newest = Some(entry.last_updated);
        }
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Drop oldest entries until at most `max` remain; returns evicted names.
    fn prune(&mut self, max: usize) -> Vec<String> {
        if self.entries.len() <= max {
            return Vec::new();
        }
        let mut by_age: Vec<(DateTime<Utc>, String)> = self
            .entries
            .values()
            .map(|e| (e.last_updated, e.name.clone()))
            .collect();
        by_age.sort();
        let excess = self.entries.len() - max;
        by_age
            .into_iter()
            .take(excess)
            .map(|(_, name)| {
                self.entries.remove(&name);
                name
            })
            .collect()
    }
}

/// Encrypted, size-bounded cache of uploads.
///
/// Loaded once at construction and re-encrypted to disk after every
/// mutation. All reads and writes go through one mutex, so writes for the
/// same name are serialized and the last writer wins. A missing, corrupt or
/// undecryptable blob yields an empty cache: the cache only saves remote
/// lookups and is never the source of truth.
pub struct EncryptedCache {
    config: CacheConfig,
    cipher: CacheCipher,
    store: Mutex<CacheStore>,
    metrics: Arc<MetricsCollector>,
}

impl EncryptedCache {
    /// Open the cache at `config.path`, decrypting it with `key`.
    pub fn open(config: CacheConfig, key: &CacheKey, metrics: Arc<MetricsCollector>) -> Self {
        let cipher = CacheCipher::new(key);
        let mut store = load_store(&config.path, &cipher);
        store.prune(config.max_entries);
        Self {
            config,
            cipher,
            store: Mutex::new(store),
            metrics,
        }
    }

    /// Configuration this cache was opened with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up an entry, counting a hit or a miss.
    pub fn get(&self, name: &str) -> Option<CacheEntry> {
        let entry = self.lock().entries.get(name).cloned();
        match entry {
            Some(_) => self.metrics.record_cache_hit(),
            None => self.metrics.record_cache_miss(),
        }
        entry
    }

    /// Insert or overwrite `name`, prune, and persist.
    ///
    /// The in-memory state is updated even when persisting fails; the
    /// returned error only reports the failed write.
    pub fn put(
        &self,
        name: &str,
        identifier: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<CacheEntry> {
        if name.is_empty() {
            return Err(MimirError::Cache("cache key must not be empty".into()));
        }
        if identifier.is_empty() {
            return Err(MimirError::Cache(format!(
                "refusing to cache empty identifier for {name}"
            )));
        }

        let mut store = self.lock();
        let entry = CacheEntry {
            name: name.to_owned(),
            identifier: identifier.to_owned(),
            metadata,
            last_updated: store.next_timestamp(),
        };
        store.upsert(entry.clone());
        let evicted = store.prune(self.config.max_entries);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted oldest cache entries");
        }
        self.persist(&store)?;
        Ok(entry)
    }

    /// Remove `name`, persisting if it was present.
    pub fn remove(&self, name: &str) -> Result<Option<CacheEntry>> {
        let mut store = self.lock();
        let removed = store.entries.remove(name);
        if removed.is_some() {
            self.persist(&store)?;
        }
        Ok(removed)
    }

    /// Merge a full remote listing and mark the bulk update time.
    ///
    /// Listed entries overwrite local ones with the same name; local-only
    /// entries are kept. Entries with empty identifiers are skipped.
    pub fn merge_listing(&self, entries: impl IntoIterator<Item = CacheEntry>) -> Result<usize> {
        let mut store = self.lock();
        let mut merged = 0;
        for entry in entries {
            if entry.name.is_empty() || entry.identifier.is_empty() {
                continue;
            }
            store.upsert(entry);
            merged += 1;
        }
        store.last_bulk_update = Some(Utc::now());
        store.prune(self.config.max_entries);
        self.persist(&store)?;
        Ok(merged)
    }

    /// Whether the last bulk refresh is older than the refresh interval.
    pub fn needs_update(&self) -> bool {
        match self.lock().last_bulk_update {
            None => true,
            Some(last) => {
                let age = Utc::now().signed_duration_since(last);
                age.to_std().unwrap_or(Duration::ZERO) > self.config.refresh_interval
            }
        }
    }

    /// Time of the last bulk refresh.
    pub fn last_bulk_update(&self) -> Option<DateTime<Utc>> {
        self.lock().last_bulk_update
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Encrypt the store and write it atomically (tmp file + rename).
    fn persist(&self, store: &CacheStore) -> Result<()> {
        let path = &self.config.path;
        let plaintext = serde_json::to_vec(&store.to_persisted())?;
        let blob = self.cipher.encrypt(&plaintext)?;
        write_atomic(path, &blob).map_err(|e| {
            warn!(path = %path.display(), error = %e, "failed to persist cache");
            MimirError::Cache(format!("failed to write {}: {e}", path.display()))
        })
    }

    fn lock(&self) -> MutexGuard<'_, CacheStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn load_store(path: &Path, cipher: &CacheCipher) -> CacheStore {
    let blob = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no cache file, starting empty");
            return CacheStore::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read cache, starting empty");
            return CacheStore::default();
        }
    };
    let plaintext = match cipher.decrypt(&blob) {
        Ok(p) => p,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot decrypt cache, starting empty");
            return CacheStore::default();
        }
    };
    match serde_json::from_slice::<PersistedCache>(&plaintext) {
        Ok(mut persisted) => {
            persisted
                .files
                .retain(|name, e| !name.is_empty() && !e.identifier.is_empty());
            CacheStore::from_persisted(persisted)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt cache contents, starting empty");
            CacheStore::default()
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)
}
