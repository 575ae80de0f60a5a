//! Configuration and statistics types

use crate::release::ReleaseExecutor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Called with the cache name when a lifecycle signal arrives
pub type LifecycleCallback = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// Configuration for a memory cache
#[derive(Clone)]
pub struct MemoryCacheConfig {
    pub name: Option<String>,
    /// Maximum number of entries (unbounded by default)
    pub count_limit: usize,
    /// Maximum total cost (unbounded by default)
    pub cost_limit: u64,
    /// Maximum time since last access (unbounded by default)
    pub age_limit: Duration,
    /// Interval of the background trimmer; zero disables it
    pub auto_trim_interval: Duration,
    pub remove_all_on_memory_pressure: bool,
    pub remove_all_on_background: bool,
    /// Drop evicted values on a background executor instead of the caller
    pub release_asynchronously: bool,
    /// Drop evicted values on the designated executor
    pub release_on_designated_thread: bool,
    /// Designated executor; a process-wide one is used when absent
    pub designated_executor: Option<ReleaseExecutor>,
    pub on_memory_pressure: Option<LifecycleCallback>,
    pub on_background: Option<LifecycleCallback>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            name: None,
            count_limit: usize::MAX,
            cost_limit: u64::MAX,
            age_limit: Duration::MAX,
            auto_trim_interval: Duration::from_secs(5),
            remove_all_on_memory_pressure: true,
            remove_all_on_background: false,
            release_asynchronously: true,
            release_on_designated_thread: false,
            designated_executor: None,
            on_memory_pressure: None,
            on_background: None,
        }
    }
}

impl MemoryCacheConfig {
    /// Build a config from `MEMORY_CACHE_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: std::env::var("MEMORY_CACHE_NAME").ok(),
            count_limit: env_parse("MEMORY_CACHE_COUNT_LIMIT").unwrap_or(defaults.count_limit),
            cost_limit: env_parse("MEMORY_CACHE_COST_LIMIT").unwrap_or(defaults.cost_limit),
            age_limit: env_parse("MEMORY_CACHE_AGE_LIMIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.age_limit),
            auto_trim_interval: env_parse("MEMORY_CACHE_AUTO_TRIM_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.auto_trim_interval),
            remove_all_on_memory_pressure: env_parse("MEMORY_CACHE_CLEAR_ON_PRESSURE")
                .unwrap_or(defaults.remove_all_on_memory_pressure),
            remove_all_on_background: env_parse("MEMORY_CACHE_CLEAR_ON_BACKGROUND")
                .unwrap_or(defaults.remove_all_on_background),
            release_asynchronously: env_parse("MEMORY_CACHE_RELEASE_ASYNC")
                .unwrap_or(defaults.release_asynchronously),
            ..defaults
        }
    }
}

impl fmt::Debug for MemoryCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCacheConfig")
            .field("name", &self.name)
            .field("count_limit", &self.count_limit)
            .field("cost_limit", &self.cost_limit)
            .field("age_limit", &self.age_limit)
            .field("auto_trim_interval", &self.auto_trim_interval)
            .field(
                "remove_all_on_memory_pressure",
                &self.remove_all_on_memory_pressure,
            )
            .field("remove_all_on_background", &self.remove_all_on_background)
            .field("release_asynchronously", &self.release_asynchronously)
            .field(
                "release_on_designated_thread",
                &self.release_on_designated_thread,
            )
            .field("designated_executor", &self.designated_executor)
            .finish_non_exhaustive()
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

/// Statistics about the memory cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryCacheStats {
    pub entries: usize,
    pub total_cost: u64,
    pub hits: u64,
    pub misses: u64,
}
