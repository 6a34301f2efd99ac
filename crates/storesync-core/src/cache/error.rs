use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors that cross the cache boundary.
///
/// Background refresh failures never show up here; they are logged and the
/// stale value keeps being served.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Failed to load {key}: {cause:#}")]
    LoadFailure {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("Cached value for {key} is not of the requested type")]
    TypeMismatch { key: String },

    #[error("Stale time {stale:?} exceeds cache time {cache:?}")]
    InvalidConfig { stale: Duration, cache: Duration },
}

impl CacheError {
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheError::LoadFailure { key, .. } | CacheError::TypeMismatch { key } => Some(key),
            CacheError::InvalidConfig { .. } => None,
        }
    }
}
