//! Configuration for the remote client and the local store.
//!
//! ```json
//! {
//!   "remote": { "base_url": "https://api.example.com", "timeout_ms": 10000 },
//!   "store": { "path": "/var/lib/myrooms/store.bin" }
//! }
//! ```
//!
//! `DATA_ACCESS_BASE_URL` and `DATA_ACCESS_STORE_PATH` override the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const BASE_URL_ENV: &str = "DATA_ACCESS_BASE_URL";
pub const STORE_PATH_ENV: &str = "DATA_ACCESS_STORE_PATH";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Where the local store persists. No path means in memory only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Apply environment overrides.
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(base_url) = lookup(BASE_URL_ENV).filter(|v| !v.is_empty()) {
            tracing::debug!(%base_url, "base url overridden from environment");
            self.remote.base_url = base_url;
        }
        if let Some(path) = lookup(STORE_PATH_ENV).filter(|v| !v.is_empty()) {
            self.store.path = Some(PathBuf::from(path));
        }
        self
    }
}
