//! In-process LRU cache bounded by count, cost and age
//!
//! Entries are kept in an arena-backed recency list guarded by a single lock.
//! A background thread trims the cache to its limits, and evicted values are
//! dropped inline, on a shared background executor, or on a designated
//! executor for values whose teardown must happen on a particular thread.

mod cache;
mod lifecycle;
mod lru;
mod release;
mod types;

pub use cache::{MemoryCache, DEFAULT_COST};
pub use lifecycle::{LifecycleHub, LifecycleObserver};
pub use release::ReleaseExecutor;
pub use types::{LifecycleCallback, MemoryCacheConfig, MemoryCacheStats};
