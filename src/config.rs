//! Configuration and credential loading.
//!
//! Settings come from a TOML file with the following resolution order:
//! 1. Explicit path (CLI `--config`)
//! 2. `~/.mimir/config.toml` (user)
//! 3. Built-in defaults
//!
//! Credentials never live in the config file; they are read from the
//! environment (see [`Credentials::from_env`]).
//!
//! ```toml
//! [cache]
//! max_entries = 500
//!
//! [pinning]
//! min_interval_ms = 1500
//! max_retries = 8
//!
//! [batch]
//! workers = 8
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheConfig, CacheKey, default_cache_path};
use crate::telemetry::MetricsConfig;
use crate::transport::TransportConfig;
use crate::{MimirError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub pinning: ProviderSettings,
    #[serde(default)]
    pub permanent: ProviderSettings,
    #[serde(default)]
    pub batch: BatchSettings,
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Encrypted blob location (default: `~/.cache/mimir/cache.bin`). Each
    /// provider keeps its own blob beside it, e.g. `pinning.cache.bin`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Key file location (default: `~/.mimir/cache.key`).
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Maximum cached entries (default: 1000).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Seconds between bulk refreshes (default: 30).
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: None,
            key_path: None,
            max_entries: default_max_entries(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    1_000
}

fn default_refresh_interval() -> u64 {
    30
}

impl CacheSettings {
    /// Cache settings for one provider's blob.
    pub fn to_cache_config(&self, provider: &str) -> CacheConfig {
        let base = self.path.clone().unwrap_or_else(default_cache_path);
        let file_name = base
            .file_name()
            .map_or_else(|| "cache.bin".to_owned(), |n| n.to_string_lossy().into_owned());
        CacheConfig::new(base.with_file_name(format!("{provider}.{file_name}")))
            .max_entries(self.max_entries)
            .refresh_interval(Duration::from_secs(self.refresh_interval_secs))
    }
}

/// `[metrics]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// Snapshot directory (default: `~/.cache/mimir/metrics`).
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Seconds between periodic flushes (default: 3600).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    /// Duration samples kept after a flush (default: 1000).
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            dir: None,
            flush_interval_secs: default_flush_interval(),
            max_samples: default_max_samples(),
        }
    }
}

fn default_flush_interval() -> u64 {
    3_600
}

fn default_max_samples() -> usize {
    1_000
}

impl MetricsSettings {
    pub fn to_metrics_config(&self) -> MetricsConfig {
        let mut config = MetricsConfig::new()
            .flush_interval(Duration::from_secs(self.flush_interval_secs.max(1)))
            .max_samples(self.max_samples);
        if let Some(dir) = &self.dir {
            config = config.dir(dir.clone());
        }
        config
    }
}

/// `[pinning]` / `[permanent]` section.
///
/// Every field is optional; unset fields keep the provider's own default,
/// so the two stores can keep different rate limits and retry budgets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub gateway_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub min_interval_ms: Option<u64>,
    pub jitter_min_ms: Option<u64>,
    pub jitter_max_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub circuit_threshold: Option<u32>,
    pub circuit_cooldown_secs: Option<u64>,
    pub max_upload_bytes: Option<u64>,
    /// Deadline for one logical operation, retries included.
    pub deadline_secs: Option<u64>,
}

impl ProviderSettings {
    /// Overlay these settings onto a provider's default transport.
    pub fn apply_transport(&self, base: TransportConfig) -> Result<TransportConfig> {
        let mut config = base;
        if let Some(secs) = self.request_timeout_secs {
            config = config.request_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = self.min_interval_ms {
            config = config.min_interval(Duration::from_millis(ms));
        }
        match (self.jitter_min_ms, self.jitter_max_ms) {
            (None, None) => {}
            (_, Some(0)) => config = config.no_jitter(),
            (min, Some(max)) => {
                let min = min.unwrap_or(0);
                if min > max {
                    return Err(MimirError::Configuration(format!(
                        "jitter_min_ms ({min}) exceeds jitter_max_ms ({max})"
                    )));
                }
                config = config.jitter(Duration::from_millis(min)..=Duration::from_millis(max));
            }
            (Some(_), None) => {
                return Err(MimirError::Configuration(
                    "jitter_min_ms requires jitter_max_ms".into(),
                ));
            }
        }

        let mut retry = config.retry.clone();
        if let Some(n) = self.max_retries {
            retry = retry.max_retries(n);
        }
        if let Some(ms) = self.retry_base_ms {
            retry = retry.base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.retry_max_delay_ms {
            retry = retry.max_delay(Duration::from_millis(ms));
        }

        let mut circuit = config.circuit.clone();
        if let Some(n) = self.circuit_threshold {
            circuit = circuit.threshold(n);
        }
        if let Some(secs) = self.circuit_cooldown_secs {
            circuit = circuit.cooldown(Duration::from_secs(secs));
        }

        config = config.retry(retry).circuit(circuit);
        if let Some(secs) = self.deadline_secs {
            config = config.deadline(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

/// `[batch]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchSettings {
    /// Worker pool size (default: available parallelism + 4, max 32).
    #[serde(default)]
    pub workers: Option<usize>,
    /// Deadline for a whole batch.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist; without one, a missing user config
    /// falls back to defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| MimirError::Configuration(format!("failed to parse config: {e}")))
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MimirError::Configuration(format!("failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MimirError::Configuration(format!("failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MimirError::Configuration(format!(
                "config file not found: {path:?}"
            )));
        }

        Ok(mimir_home()
            .map(|home| home.join("config.toml"))
            .filter(|p| p.exists()))
    }
}

/// `~/.mimir`
fn mimir_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".mimir"))
}

/// Environment variable names, by credential.
pub const PINATA_API_KEY: &str = "PINATA_API_KEY";
pub const PINATA_SECRET_API_KEY: &str = "PINATA_SECRET_API_KEY";
pub const PERMANENT_RELAY_URL: &str = "PERMANENT_RELAY_URL";
pub const PERMANENT_RELAY_TOKEN: &str = "PERMANENT_RELAY_TOKEN";
pub const MIMIR_CACHE_KEY: &str = "MIMIR_CACHE_KEY";
pub const MIMIR_CACHE_KEY_PATH: &str = "MIMIR_CACHE_KEY_PATH";

/// Secrets resolved from the environment.
#[derive(Clone, Default)]
pub struct Credentials {
    pub pinning_api_key: Option<String>,
    pub pinning_secret_key: Option<String>,
    pub relay_url: Option<String>,
    pub relay_token: Option<String>,
    /// Inline base64 cache key.
    pub cache_key: Option<String>,
    pub cache_key_path: Option<PathBuf>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("pinning_api_key", &set(&self.pinning_api_key))
            .field("pinning_secret_key", &set(&self.pinning_secret_key))
            .field("relay_url", &self.relay_url)
            .field("relay_token", &set(&self.relay_token))
            .field("cache_key", &set(&self.cache_key))
            .field("cache_key_path", &self.cache_key_path)
            .finish()
    }
}

impl Credentials {
    /// Read credentials from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through `lookup` (name → value). Blank values
    /// count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            pinning_api_key: get(PINATA_API_KEY),
            pinning_secret_key: get(PINATA_SECRET_API_KEY),
            relay_url: get(PERMANENT_RELAY_URL),
            relay_token: get(PERMANENT_RELAY_TOKEN),
            cache_key: get(MIMIR_CACHE_KEY),
            cache_key_path: get(MIMIR_CACHE_KEY_PATH).map(PathBuf::from),
        }
    }

    /// Pinning key pair, `None` when neither half is set.
    ///
    /// Fails when only one half is present.
    pub fn pinning(&self) -> Result<Option<(String, String)>> {
        pair(
            &self.pinning_api_key,
            PINATA_API_KEY,
            &self.pinning_secret_key,
            PINATA_SECRET_API_KEY,
        )
    }

    /// Relay URL and bearer token, `None` when neither is set.
    ///
    /// Fails when only one is present.
    pub fn permanent(&self) -> Result<Option<(String, String)>> {
        pair(
            &self.relay_url,
            PERMANENT_RELAY_URL,
            &self.relay_token,
            PERMANENT_RELAY_TOKEN,
        )
    }

    /// Resolve the cache key.
    ///
    /// An inline key wins; otherwise the key file (from the environment,
    /// then `[cache] key_path`, then `~/.mimir/cache.key`) is read, or
    /// generated on first use.
    pub fn cache_key(&self, settings: &CacheSettings) -> Result<CacheKey> {
        if let Some(inline) = &self.cache_key {
            return CacheKey::from_base64(inline)
                .map_err(|e| MimirError::Configuration(format!("{MIMIR_CACHE_KEY}: {e}")));
        }
        let path = self
            .cache_key_path
            .clone()
            .or_else(|| settings.key_path.clone())
            .or_else(|| mimir_home().map(|home| home.join("cache.key")))
            .ok_or_else(|| {
                MimirError::Configuration(format!(
                    "no home directory; set {MIMIR_CACHE_KEY} or {MIMIR_CACHE_KEY_PATH}"
                ))
            })?;
        CacheKey::load_or_generate(&path)
    }
}

fn pair(
    first: &Option<String>,
    first_name: &str,
    second: &Option<String>,
    second_name: &str,
) -> Result<Option<(String, String)>> {
    match (first, second) {
        (Some(a), Some(b)) => Ok(Some((a.clone(), b.clone()))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(MimirError::Configuration(format!(
            "{second_name} is required when {first_name} is set"
        ))),
        (None, Some(_)) => Err(MimirError::Configuration(format!(
            "{first_name} is required when {second_name} is set"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_sections_missing() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.cache.max_entries, 1_000);
        assert_eq!(config.cache.refresh_interval_secs, 30);
        assert_eq!(config.metrics.flush_interval_secs, 3_600);
        assert!(config.batch.workers.is_none());
    }

    #[test]
    fn cache_blob_is_named_per_provider() {
        let config = Config::from_toml("[cache]\npath = \"/var/lib/mimir/store.bin\"\n").unwrap();
        let pinning = config.cache.to_cache_config("pinning");
        let permanent = config.cache.to_cache_config("permanent");
        assert_eq!(pinning.path, PathBuf::from("/var/lib/mimir/pinning.store.bin"));
        assert_eq!(permanent.path, PathBuf::from("/var/lib/mimir/permanent.store.bin"));
    }

    #[test]
    fn unknown_provider_field_is_rejected() {
        let err = Config::from_toml("[pinning]\nmin_interval = 5\n").unwrap_err();
        assert!(matches!(err, MimirError::Configuration(_)));
    }

    #[test]
    fn provider_overrides_keep_unset_defaults() {
        let settings = ProviderSettings {
            max_retries: Some(8),
            min_interval_ms: Some(1500),
            ..Default::default()
        };
        let base = TransportConfig::new().request_timeout(Duration::from_secs(45));
        let config = settings.apply_transport(base).unwrap();
        assert_eq!(config.retry.max_retries, 8);
        assert_eq!(config.min_interval, Duration::from_millis(1500));
        assert_eq!(config.request_timeout, Duration::from_secs(45));
    }

    #[test]
    fn inverted_jitter_range_is_rejected() {
        let settings = ProviderSettings {
            jitter_min_ms: Some(2000),
            jitter_max_ms: Some(500),
            ..Default::default()
        };
        assert!(settings.apply_transport(TransportConfig::new()).is_err());
    }

    #[test]
    fn zero_jitter_max_disables_jitter() {
        let settings = ProviderSettings {
            jitter_max_ms: Some(0),
            ..Default::default()
        };
        let base = TransportConfig::new().jitter(Duration::ZERO..=Duration::from_secs(1));
        assert!(settings.apply_transport(base).unwrap().jitter.is_none());
    }

    #[test]
    fn half_set_pairs_fail_fast() {
        let creds = Credentials::from_lookup(lookup(&[(PINATA_API_KEY, "k")]));
        let err = creds.pinning().unwrap_err();
        assert!(err.to_string().contains(PINATA_SECRET_API_KEY));
        assert!(creds.permanent().unwrap().is_none());
    }

    #[test]
    fn blank_values_count_as_unset() {
        let creds = Credentials::from_lookup(lookup(&[
            (PERMANENT_RELAY_URL, "https://relay.example"),
            (PERMANENT_RELAY_TOKEN, "  "),
        ]));
        assert!(creds.permanent().is_err());
    }

    #[test]
    fn inline_cache_key_wins() {
        let key = CacheKey::generate();
        let creds = Credentials::from_lookup(lookup(&[(MIMIR_CACHE_KEY, key.to_base64().as_str())]));
        assert_eq!(creds.cache_key(&CacheSettings::default()).unwrap(), key);
    }

    #[test]
    fn key_file_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("cache.key");
        let creds = Credentials::from_lookup(lookup(&[(
            MIMIR_CACHE_KEY_PATH,
            path.to_str().unwrap(),
        )]));
        let first = creds.cache_key(&CacheSettings::default()).unwrap();
        let second = creds.cache_key(&CacheSettings::default()).unwrap();
        assert_eq!(first, second);
        assert!(path.exists());
    }

    #[test]
    fn debug_hides_secrets() {
        let creds = Credentials::from_lookup(lookup(&[
            (PINATA_API_KEY, "key-123"),
            (PINATA_SECRET_API_KEY, "secret-456"),
        ]));
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("key-123"));
        assert!(!rendered.contains("secret-456"));
    }
}
