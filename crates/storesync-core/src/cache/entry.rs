use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::CacheError;

/// Type-erased payload. Loaders normalize server JSON into a concrete type
/// before it lands here; readers get it back through `downcast`.
pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// Default age after which a value is served but revalidated.
const DEFAULT_STALE_SECS: u64 = 30;

/// Default age after which a value is discarded and must be refetched.
const DEFAULT_CACHE_SECS: u64 = 5 * 60;

/// Staleness windows for one cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    stale_time: Duration,
    cache_time: Duration,
}

impl CacheConfig {
    /// Build a config, rejecting `stale_time > cache_time`.
    pub fn new(stale_time: Duration, cache_time: Duration) -> Result<Self, CacheError> {
        if stale_time > cache_time {
            return Err(CacheError::InvalidConfig {
                stale: stale_time,
                cache: cache_time,
            });
        }
        Ok(Self {
            stale_time,
            cache_time,
        })
    }

    pub fn from_secs(stale_secs: u64, cache_secs: u64) -> Result<Self, CacheError> {
        Self::new(
            Duration::from_secs(stale_secs),
            Duration::from_secs(cache_secs),
        )
    }

    pub fn from_millis(stale_ms: u64, cache_ms: u64) -> Result<Self, CacheError> {
        Self::new(
            Duration::from_millis(stale_ms),
            Duration::from_millis(cache_ms),
        )
    }

    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    pub fn cache_time(&self) -> Duration {
        self.cache_time
    }

    /// Classify an entry of the given age.
    pub fn freshness(&self, age: Duration) -> Freshness {
        if age < self.stale_time {
            Freshness::Fresh
        } else if age < self.cache_time {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(DEFAULT_STALE_SECS),
            cache_time: Duration::from_secs(DEFAULT_CACHE_SECS),
        }
    }
}

/// The three age bands of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve, no refresh.
    Fresh,
    /// Serve immediately, refresh in the background.
    Stale,
    /// Must not be served.
    Expired,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Freshness::Fresh => write!(f, "fresh"),
            Freshness::Stale => write!(f, "stale"),
            Freshness::Expired => write!(f, "expired"),
        }
    }
}

pub(crate) struct CacheEntry {
    pub(crate) value: AnyValue,
    pub(crate) fetched_at: Instant,
    pub(crate) fetched_at_wall: DateTime<Utc>,
    pub(crate) config: CacheConfig,
}

impl CacheEntry {
    pub(crate) fn new(value: AnyValue, config: CacheConfig) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            fetched_at_wall: Utc::now(),
            config,
        }
    }

    pub(crate) fn freshness(&self, now: Instant) -> Freshness {
        self.config
            .freshness(now.saturating_duration_since(self.fetched_at))
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(
    key: &str,
    value: AnyValue,
) -> Result<Arc<T>, CacheError> {
    value.downcast::<T>().map_err(|_| CacheError::TypeMismatch {
        key: key.to_string(),
    })
}

/// Snapshot of one entry for status displays.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub key: String,
    pub freshness: Freshness,
    pub fetched_at: DateTime<Utc>,
    pub fetching: bool,
}

impl EntryInfo {
    pub fn age_display(&self) -> String {
        age_display(self.fetched_at, Utc::now())
    }
}

/// Human readable age, e.g. "just now", "5m ago", "2h ago".
pub fn age_display(fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - fetched_at).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / 1440)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_rejects_stale_beyond_cache() {
        let err = CacheConfig::from_secs(10, 5).unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig { .. }));
        assert!(CacheConfig::from_secs(5, 5).is_ok());
    }

    #[test]
    fn test_freshness_bands() {
        let config = CacheConfig::from_millis(1000, 5000).unwrap();
        assert_eq!(config.freshness(Duration::from_millis(0)), Freshness::Fresh);
        assert_eq!(config.freshness(Duration::from_millis(999)), Freshness::Fresh);
        assert_eq!(config.freshness(Duration::from_millis(1000)), Freshness::Stale);
        assert_eq!(config.freshness(Duration::from_millis(4999)), Freshness::Stale);
        assert_eq!(config.freshness(Duration::from_millis(5000)), Freshness::Expired);
    }

    #[test]
    fn test_zero_stale_time_is_never_fresh() {
        let config = CacheConfig::from_secs(0, 60).unwrap();
        assert_eq!(config.freshness(Duration::ZERO), Freshness::Stale);
    }

    #[test]
    fn test_age_display() {
        let now = Utc::now();
        assert_eq!(age_display(now, now), "just now");
        assert_eq!(age_display(now + chrono::Duration::minutes(3), now), "just now");
        assert_eq!(age_display(now - chrono::Duration::minutes(5), now), "5m ago");
        assert_eq!(age_display(now - chrono::Duration::minutes(130), now), "2h ago");
        assert_eq!(age_display(now - chrono::Duration::days(3), now), "3d ago");
    }

    #[test]
    fn test_downcast_mismatch() {
        let value: AnyValue = Arc::new(42u32);
        assert_eq!(*downcast::<u32>("k", value.clone()).unwrap(), 42);
        assert!(matches!(
            downcast::<String>("k", value),
            Err(CacheError::TypeMismatch { .. })
        ));
    }
}
