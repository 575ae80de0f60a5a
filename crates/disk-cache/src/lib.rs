//! Persistent key/value cache
//!
//! Values are indexed in a SQLite manifest. Small values are stored inline in
//! their manifest row and larger ones as individual files in a content
//! directory. All work runs on a single serialized lane, and a background task
//! trims the cache to its count, size and age limits.

mod cache;
mod error;
mod lane;
mod storage;
mod types;

pub use cache::DiskCache;
pub use error::{DiskCacheError, Result};
pub use types::{DiskCacheConfig, DiskCacheStats, DiskItem, DiskLimits, DEFAULT_INLINE_THRESHOLD};
