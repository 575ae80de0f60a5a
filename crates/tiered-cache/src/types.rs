//! Configuration and statistics types

use disk_cache::{DiskCacheConfig, DiskCacheStats};
use memory_cache::{MemoryCacheConfig, MemoryCacheStats};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_NAME: &str = "default";

/// Configuration for a tiered cache
///
/// The name and path override the ones in the nested tier configs.
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    pub name: String,
    /// Root directory of the disk tier
    pub path: PathBuf,
    pub memory: MemoryCacheConfig,
    pub disk: DiskCacheConfig,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self::with_name(DEFAULT_NAME)
    }
}

impl TieredCacheConfig {
    /// Cache named `name`, stored under `./cache/<name>`
    pub fn with_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: default_path(&name),
            name,
            memory: MemoryCacheConfig::default(),
            disk: DiskCacheConfig::default(),
        }
    }

    /// Cache stored at `path`, named after its last path component
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: name_from_path(&path),
            path,
            memory: MemoryCacheConfig::default(),
            disk: DiskCacheConfig::default(),
        }
    }

    /// Build a config from `CACHE_NAME` / `CACHE_DIR` plus the tier variables
    pub fn from_env() -> Self {
        let name = std::env::var("CACHE_NAME").unwrap_or_else(|_| DEFAULT_NAME.to_string());
        let path = std::env::var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_path(&name));
        Self {
            name,
            path,
            memory: MemoryCacheConfig::from_env(),
            disk: DiskCacheConfig::from_env(),
        }
    }
}

fn default_path(name: &str) -> PathBuf {
    Path::new("./cache").join(name)
}

fn name_from_path(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_NAME.to_string())
}

/// Statistics for both tiers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TieredCacheStats {
    pub memory: MemoryCacheStats,
    pub disk: DiskCacheStats,
}
