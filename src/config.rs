use crate::PreviewError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform cache directory.
const APP_DIR_NAME: &str = "link-preview";

pub const DEFAULT_MEMORY_MAX_ENTRIES: usize = 100;
pub const DEFAULT_MEMORY_MAX_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_TTL_MS: u64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const MAX_CONCURRENT_FETCHES: usize = 16;

/// Settings for a link-preview session.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// cache_dir = "/var/cache/editor/previews"
/// default_ttl_ms = 3600000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub cache_dir: PathBuf,
    pub memory_max_entries: usize,
    pub memory_max_bytes: usize,
    pub default_ttl_ms: u64,
    /// How long a dispatched request may stay unanswered.
    pub request_timeout_ms: u64,
    pub max_concurrent_fetches: usize,
    /// Backend endpoint for [`RemoteFetcher`](crate::RemoteFetcher).
    pub remote_endpoint: Option<String>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            memory_max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
            memory_max_bytes: DEFAULT_MEMORY_MAX_BYTES,
            default_ttl_ms: DEFAULT_TTL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_concurrent_fetches: MAX_CONCURRENT_FETCHES,
            remote_endpoint: None,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

impl PreviewConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, PreviewError> {
        let config: Self =
            toml::from_str(source).map_err(|e| PreviewError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreviewError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            PreviewError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), PreviewError> {
        if self.memory_max_entries == 0 {
            return Err(PreviewError::ConfigError(
                "memory_max_entries must be at least 1".into(),
            ));
        }
        if self.memory_max_bytes == 0 {
            return Err(PreviewError::ConfigError(
                "memory_max_bytes must be at least 1".into(),
            ));
        }
        if self.default_ttl_ms == 0 {
            return Err(PreviewError::ConfigError(
                "default_ttl_ms must be at least 1".into(),
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(PreviewError::ConfigError(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_memory_limits(mut self, max_entries: usize, max_bytes: usize) -> Self {
        self.memory_max_entries = max_entries;
        self.memory_max_bytes = max_bytes;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max_concurrent_fetches: usize) -> Self {
        self.max_concurrent_fetches = max_concurrent_fetches;
        self
    }

    pub fn with_remote_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.remote_endpoint = Some(endpoint.into());
        self
    }
}
