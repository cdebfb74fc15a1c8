//! Node configuration

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bundle::manifest::DEFAULT_CACHE_DURATION_MS;
use crate::loader::DEFAULT_SCHEME;
use crate::network::distribution::DistributionConfig;

/// Error loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for a Mooring node
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Path to the database file
    /// If None, the node runs on an in-memory database
    pub db_path: Option<PathBuf>,

    /// URL scheme of app addresses
    /// Default: "mooring"
    pub scheme: String,

    /// How long manifest and chunk requests wait for a response (milliseconds)
    /// Default: 5000
    pub request_timeout_ms: u64,

    /// Maximum sends in flight during a broadcast
    /// Default: 8
    pub broadcast_concurrency: usize,

    /// Capacity of the node event channel
    /// Default: 256
    pub event_capacity: usize,

    /// How often expired apps are removed and the chunk budget enforced (seconds)
    /// 0 disables the maintenance loop
    /// Default: 3600 (1 hour)
    pub cleanup_interval_secs: u64,

    /// Upper bound on cached chunk bytes, enforced by the maintenance loop
    /// Default: 1 GiB
    pub max_chunk_cache_bytes: Option<u64>,

    /// Cache duration stamped on apps this node deploys (milliseconds)
    /// Default: 7 days
    pub default_cache_duration_ms: u64,
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // paths can carry user names
        f.debug_struct("NodeConfig")
            .field("db_path", &self.db_path.as_ref().map(|_| "[REDACTED]"))
            .field("scheme", &self.scheme)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("broadcast_concurrency", &self.broadcast_concurrency)
            .field("event_capacity", &self.event_capacity)
            .field("cleanup_interval_secs", &self.cleanup_interval_secs)
            .field("max_chunk_cache_bytes", &self.max_chunk_cache_bytes)
            .field("default_cache_duration_ms", &self.default_cache_duration_ms)
            .finish()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            scheme: DEFAULT_SCHEME.to_string(),
            request_timeout_ms: 5_000,
            broadcast_concurrency: 8,
            event_capacity: 256,
            cleanup_interval_secs: 3600,
            max_chunk_cache_bytes: Some(1024 * 1024 * 1024), // 1 GiB
            default_cache_duration_ms: DEFAULT_CACHE_DURATION_MS,
        }
    }
}

impl NodeConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for testing (in-memory, short timeouts, no maintenance loop)
    pub fn for_testing() -> Self {
        Self {
            db_path: None,
            request_timeout_ms: 500,
            cleanup_interval_secs: 0,
            ..Self::default()
        }
    }

    /// Load a TOML file; missing keys take their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Set the database path
    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.db_path = Some(path);
        self
    }

    /// Set the address scheme
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout_ms(mut self, millis: u64) -> Self {
        self.request_timeout_ms = millis;
        self
    }

    /// Set the broadcast concurrency cap
    pub fn with_broadcast_concurrency(mut self, concurrency: usize) -> Self {
        self.broadcast_concurrency = concurrency;
        self
    }

    /// Set the maintenance interval (0 disables it)
    pub fn with_cleanup_interval(mut self, secs: u64) -> Self {
        self.cleanup_interval_secs = secs;
        self
    }

    /// Set the chunk cache budget (None for unbounded)
    pub fn with_max_chunk_cache_bytes(mut self, bytes: Option<u64>) -> Self {
        self.max_chunk_cache_bytes = bytes;
        self
    }

    /// Set the cache duration for deployed apps
    pub fn with_default_cache_duration_ms(mut self, millis: u64) -> Self {
        self.default_cache_duration_ms = millis;
        self
    }

    pub(crate) fn distribution(&self) -> DistributionConfig {
        DistributionConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            broadcast_concurrency: self.broadcast_concurrency.max(1),
            event_capacity: self.event_capacity.max(1),
        }
    }

    pub(crate) fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }
}
