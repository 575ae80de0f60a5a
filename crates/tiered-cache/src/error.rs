//! Error types for the tiered cache

use disk_cache::DiskCacheError;
use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    Disk(DiskCacheError),
    Config(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Disk(err) => write!(f, "Disk cache error: {}", err),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Disk(err) => Some(err),
            CacheError::Config(_) => None,
        }
    }
}

impl From<DiskCacheError> for CacheError {
    fn from(err: DiskCacheError) -> Self {
        CacheError::Disk(err)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
