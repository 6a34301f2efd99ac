//! Application configuration management.
//!
//! This module handles loading and saving the configuration: backend URL,
//! polling cadence, per-resource cache windows and overlay bounds.
//!
//! Configuration is stored at `~/.config/storesync/config.json`. Missing
//! fields fall back to their defaults, so a partial file is valid.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::api::client::REQUEST_TIMEOUT_SECS;
use crate::cache::{CacheConfig, CacheError};
use crate::overlay::{DEFAULT_MAX_ENTRIES, DEFAULT_NAMESPACE};

/// Application name used for config/data directory paths
const APP_NAME: &str = "storesync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable holding the bearer token
pub const TOKEN_ENV: &str = "STORESYNC_TOKEN";

/// Default notification polling interval.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Freshness windows for one resource, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub stale_secs: u64,
    pub cache_secs: u64,
}

impl CachePolicy {
    pub const fn new(stale_secs: u64, cache_secs: u64) -> Self {
        Self {
            stale_secs,
            cache_secs,
        }
    }

    pub fn cache_config(&self) -> Result<CacheConfig, CacheError> {
        CacheConfig::from_secs(self.stale_secs, self.cache_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicies {
    pub products: CachePolicy,
    pub courses: CachePolicy,
    pub blog: CachePolicy,
    pub notifications: CachePolicy,
    pub enrollment: CachePolicy,
}

impl Default for CachePolicies {
    fn default() -> Self {
        Self {
            products: CachePolicy::new(60, 600),
            courses: CachePolicy::new(60, 600),
            blog: CachePolicy::new(300, 1800),
            // Polled every 30s, so keep the stale band short
            notifications: CachePolicy::new(15, 300),
            enrollment: CachePolicy::new(10, 120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub namespace: String,
    pub max_entries: usize,
    pub clear_on_confirm: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_entries: DEFAULT_MAX_ENTRIES,
            clear_on_confirm: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub cache: CachePolicies,
    pub overlay: OverlayConfig,
    /// Directory for daily-rolling log files. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            cache: CachePolicies::default(),
            overlay: OverlayConfig::default(),
            log_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Where overlay files live: `<data dir>/storesync/overlay`.
    pub fn overlay_dir(&self) -> Result<PathBuf> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join("overlay"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Bearer token from the environment, if set and non-empty.
    pub fn token() -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}
