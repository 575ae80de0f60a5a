//! Two-tier key/value cache
//!
//! A [`TieredCache`] keeps recently used values in an in-process LRU cache
//! and every value in a persistent disk cache. Reads fall through from memory
//! to disk, and writes land in memory before they are queued for disk.

mod cache;
mod error;
mod types;

pub use cache::{TieredCache, Value};
pub use error::{CacheError, Result};
pub use types::{TieredCacheConfig, TieredCacheStats};

pub use disk_cache::{DiskCache, DiskCacheConfig, DiskCacheError, DiskItem, DiskLimits};
pub use memory_cache::{LifecycleHub, LifecycleObserver, MemoryCache, MemoryCacheConfig};
