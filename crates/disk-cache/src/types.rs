//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Values larger than this many bytes are stored as separate files
pub const DEFAULT_INLINE_THRESHOLD: usize = 20 * 1024;

/// Configuration for a disk cache
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    pub name: Option<String>,
    /// Directory holding the manifest and the `data/` content area
    pub path: PathBuf,
    pub inline_threshold: usize,
    pub count_limit: u64,
    /// Maximum total size in bytes
    pub cost_limit: u64,
    pub age_limit: Duration,
    /// Interval of the background trim task; zero disables it
    pub auto_trim_interval: Duration,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            name: None,
            path: PathBuf::from("./cache/disk"),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            count_limit: u64::MAX,
            cost_limit: u64::MAX,
            age_limit: Duration::MAX,
            auto_trim_interval: Duration::from_secs(60),
        }
    }
}

impl DiskCacheConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Build a config from `DISK_CACHE_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: std::env::var("DISK_CACHE_NAME").ok(),
            path: std::env::var("DISK_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            inline_threshold: env_parse("DISK_CACHE_INLINE_THRESHOLD")
                .unwrap_or(defaults.inline_threshold),
            count_limit: env_parse("DISK_CACHE_COUNT_LIMIT").unwrap_or(defaults.count_limit),
            cost_limit: env_parse("DISK_CACHE_COST_LIMIT").unwrap_or(defaults.cost_limit),
            age_limit: env_parse("DISK_CACHE_AGE_LIMIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.age_limit),
            auto_trim_interval: env_parse("DISK_CACHE_AUTO_TRIM_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.auto_trim_interval),
        }
    }

    pub fn limits(&self) -> DiskLimits {
        DiskLimits {
            count: self.count_limit,
            cost: self.cost_limit,
            age: self.age_limit,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

/// Limits enforced by the background trim task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLimits {
    pub count: u64,
    pub cost: u64,
    pub age: Duration,
}

impl Default for DiskLimits {
    fn default() -> Self {
        DiskCacheConfig::default().limits()
    }
}

/// A cached value together with its manifest metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskItem {
    pub key: String,
    pub value: Vec<u8>,
    pub size: u64,
    /// Backing file under `data/`, `None` when stored inline
    pub filename: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub extended: Option<Vec<u8>>,
}

impl DiskItem {
    pub fn is_inline(&self) -> bool {
        self.filename.is_none()
    }
}

/// Statistics about the disk cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskCacheStats {
    pub entries: u64,
    pub total_size: u64,
    pub inline_entries: u64,
    pub file_entries: u64,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DiskCacheConfig::default();
        assert!(config.name.is_none());
        assert_eq!(config.path, PathBuf::from("./cache/disk"));
        assert_eq!(config.inline_threshold, 20 * 1024);
        assert_eq!(config.count_limit, u64::MAX);
        assert_eq!(config.cost_limit, u64::MAX);
        assert_eq!(config.age_limit, Duration::MAX);
        assert_eq!(config.auto_trim_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_limits_from_config() {
        let config = DiskCacheConfig {
            count_limit: 10,
            cost_limit: 2048,
            ..DiskCacheConfig::new("/tmp/cache")
        };
        let limits = config.limits();
        assert_eq!(limits.count, 10);
        assert_eq!(limits.cost, 2048);
        assert_eq!(limits.age, Duration::MAX);
    }

    #[test]
    fn test_cache_stats_default() {
        let stats = DiskCacheStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_disk_item_serialization() {
        let item = DiskItem {
            key: "avatar".to_string(),
            value: vec![1, 2, 3],
            size: 3,
            filename: Some("abc123.1".to_string()),
            modified_at: Utc::now(),
            accessed_at: Utc::now(),
            extended: None,
        };

        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("abc123.1"));
        assert!(json.contains("avatar"));

        let deserialized: DiskItem = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.value, item.value);
        assert!(!deserialized.is_inline());
    }
}
