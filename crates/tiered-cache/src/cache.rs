//! Memory tier in front of a disk tier
//!
//! Writes go to memory synchronously and are then handed to the disk lane, so
//! memory is never staler than disk. Reads that miss memory fall through to
//! disk and promote what they find.
//!
//! Every facade write bumps a sequence number while it updates memory. A read
//! records the number before going to disk and only promotes its result if no
//! write happened in between and the key is still absent from memory, so a
//! late disk hit never overwrites a newer set or resurrects a removed key.

use crate::error::{CacheError, Result};
use crate::types::{TieredCacheConfig, TieredCacheStats};
use disk_cache::DiskCache;
use memory_cache::{LifecycleObserver, MemoryCache, MemoryCacheConfig, DEFAULT_COST};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cached bytes, shared between callers and the memory tier
pub type Value = Arc<[u8]>;

type Memory = MemoryCache<String, Value>;

pub struct TieredCache {
    name: String,
    memory: Arc<Memory>,
    disk: DiskCache,
    // Bumped by every facade write while it holds the lock
    writes: Arc<Mutex<u64>>,
}

impl TieredCache {
    /// Open both tiers. Fails if the disk tier cannot be opened at `config.path`.
    pub async fn open(config: TieredCacheConfig) -> Result<Self> {
        if config.name.is_empty() {
            return Err(CacheError::Config("cache name is empty".to_string()));
        }

        let disk = DiskCache::open(disk_cache::DiskCacheConfig {
            name: Some(config.name.clone()),
            path: config.path.clone(),
            ..config.disk
        })
        .await?;
        let memory = MemoryCache::new(MemoryCacheConfig {
            name: Some(config.name.clone()),
            ..config.memory
        });

        info!(name = %config.name, path = %config.path.display(), "Opened tiered cache");
        Ok(Self {
            name: config.name,
            memory: Arc::new(memory),
            disk,
            writes: Arc::new(Mutex::new(0)),
        })
    }

    /// Open a cache named `name` under `./cache/<name>`
    pub async fn with_name(name: impl Into<String>) -> Result<Self> {
        Self::open(TieredCacheConfig::with_name(name)).await
    }

    /// Open a cache stored at `path`
    pub async fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(TieredCacheConfig::with_path(path)).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn memory(&self) -> &MemoryCache<String, Value> {
        &self.memory
    }

    pub fn disk(&self) -> &DiskCache {
        &self.disk
    }

    /// Apply a memory write under the write lock so in-flight reads see it
    fn write_memory<T>(&self, write: impl FnOnce(&Memory) -> T) -> T {
        let mut writes = self.writes.lock();
        *writes += 1;
        write(&self.memory)
    }

    fn write_seq(&self) -> u64 {
        *self.writes.lock()
    }

    // Lookups

    /// Whether the memory tier holds `key`. Does not consult disk.
    pub fn contains_key(&self, key: &str) -> bool {
        self.memory.contains_key(key)
    }

    /// Whether either tier holds `key`
    pub async fn contains_key_async(&self, key: &str) -> Result<bool> {
        if self.memory.contains_key(key) {
            return Ok(true);
        }
        Ok(self.disk.contains_key(key).await?)
    }

    pub fn contains_key_blocking(&self, key: &str) -> Result<bool> {
        if self.memory.contains_key(key) {
            return Ok(true);
        }
        Ok(self.disk.contains_key_blocking(key)?)
    }

    /// Check both tiers. The callback runs inline on a memory hit, otherwise on the disk lane.
    pub fn contains_key_with_callback(
        &self,
        key: &str,
        callback: impl FnOnce(bool) + Send + 'static,
    ) {
        if self.memory.contains_key(key) {
            callback(true);
        } else {
            self.disk.contains_key_with_callback(key, callback);
        }
    }

    /// Read from memory, falling back to disk and promoting a disk hit
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.memory.get(key) {
            return Ok(Some(value));
        }
        let seen = self.write_seq();
        let found = self.disk.get(key).await?;
        Ok(found.map(|bytes| promote(&self.memory, &self.writes, seen, key, bytes)))
    }

    pub fn get_blocking(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.memory.get(key) {
            return Ok(Some(value));
        }
        let seen = self.write_seq();
        let found = self.disk.get_blocking(key)?;
        Ok(found.map(|bytes| promote(&self.memory, &self.writes, seen, key, bytes)))
    }

    /// Like [`get`](Self::get). The callback runs inline on a memory hit, otherwise on the disk lane.
    pub fn get_with_callback(
        &self,
        key: &str,
        callback: impl FnOnce(Option<Value>) + Send + 'static,
    ) {
        if let Some(value) = self.memory.get(key) {
            callback(Some(value));
            return;
        }
        let seen = self.write_seq();
        let memory = self.memory.clone();
        let writes = self.writes.clone();
        let owned_key = key.to_string();
        self.disk.get_with_callback(key, move |found| {
            callback(found.map(|bytes| promote(&memory, &writes, seen, &owned_key, bytes)));
        });
    }

    // Writes

    /// Store a value in memory and queue the disk write
    pub fn set(&self, key: &str, value: Vec<u8>) {
        self.set_with_cost(key, value, DEFAULT_COST);
    }

    /// Like [`set`](Self::set) with an explicit memory-tier cost
    pub fn set_with_cost(&self, key: &str, value: Vec<u8>, cost: u64) {
        let owned_key = key.to_string();
        self.set_with_callback(key, value, cost, move |result| {
            if let Err(e) = result {
                warn!(key = %owned_key, error = %e, "Background disk write failed");
            }
        });
    }

    /// Store a value in memory and queue the disk write, reporting its outcome
    pub fn set_with_callback(
        &self,
        key: &str,
        value: Vec<u8>,
        cost: u64,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.write_memory(|memory| {
            memory.set_with_cost(key.to_string(), Value::from(value.as_slice()), cost)
        });
        self.disk
            .set_with_callback(key, value, move |result| callback(result.map_err(Into::into)));
    }

    /// Store a value in both tiers, waiting for the disk write
    pub async fn set_async(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.set_async_with_cost(key, value, DEFAULT_COST).await
    }

    pub async fn set_async_with_cost(&self, key: &str, value: Vec<u8>, cost: u64) -> Result<()> {
        self.write_memory(|memory| {
            memory.set_with_cost(key.to_string(), Value::from(value.as_slice()), cost)
        });
        Ok(self.disk.set(key, value).await?)
    }

    pub fn set_blocking(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.set_blocking_with_cost(key, value, DEFAULT_COST)
    }

    pub fn set_blocking_with_cost(&self, key: &str, value: Vec<u8>, cost: u64) -> Result<()> {
        self.write_memory(|memory| {
            memory.set_with_cost(key.to_string(), Value::from(value.as_slice()), cost)
        });
        Ok(self.disk.set_blocking(key, value)?)
    }

    // Removal

    /// Remove from memory and queue the disk removal
    pub fn remove(&self, key: &str) {
        let owned_key = key.to_string();
        self.remove_with_callback(key, move |result| {
            if let Err(e) = result {
                warn!(key = %owned_key, error = %e, "Background disk removal failed");
            }
        });
    }

    pub fn remove_with_callback(
        &self,
        key: &str,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.write_memory(|memory| memory.remove(key));
        self.disk
            .remove_with_callback(key, move |result| callback(result.map_err(Into::into)));
    }

    pub async fn remove_async(&self, key: &str) -> Result<()> {
        self.write_memory(|memory| memory.remove(key));
        Ok(self.disk.remove(key).await?)
    }

    pub fn remove_blocking(&self, key: &str) -> Result<()> {
        self.write_memory(|memory| memory.remove(key));
        Ok(self.disk.remove_blocking(key)?)
    }

    /// Clear memory and queue clearing the disk tier
    pub fn remove_all(&self) {
        self.remove_all_with_callback(|result| {
            if let Err(e) = result {
                warn!(error = %e, "Background disk clear failed");
            }
        });
    }

    pub fn remove_all_with_callback(&self, callback: impl FnOnce(Result<()>) + Send + 'static) {
        self.write_memory(|memory| memory.remove_all());
        self.disk
            .remove_all_with_callback(move |result| callback(result.map_err(Into::into)));
    }

    /// Clear both tiers, reporting disk progress as `(removed, total)`
    pub fn remove_all_with_progress(
        &self,
        progress: impl FnMut(usize, usize) + Send + 'static,
        end: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.write_memory(|memory| memory.remove_all());
        self.disk
            .remove_all_with_progress(progress, move |result| end(result.map_err(Into::into)));
    }

    pub async fn remove_all_async(&self) -> Result<()> {
        self.write_memory(|memory| memory.remove_all());
        Ok(self.disk.remove_all().await?)
    }

    pub fn remove_all_blocking(&self) -> Result<()> {
        self.write_memory(|memory| memory.remove_all());
        Ok(self.disk.remove_all_blocking()?)
    }

    // Memory tier trimming

    pub fn trim_to_count(&self, count: usize) {
        self.memory.trim_to_count(count);
    }

    pub fn trim_to_cost(&self, cost: u64) {
        self.memory.trim_to_cost(cost);
    }

    pub fn trim_to_age(&self, age: Duration) {
        self.memory.trim_to_age(age);
    }

    pub fn handle_memory_pressure(&self) {
        self.memory.handle_memory_pressure();
    }

    pub fn handle_backgrounded(&self) {
        self.memory.handle_backgrounded();
    }

    pub async fn stats(&self) -> Result<TieredCacheStats> {
        Ok(TieredCacheStats {
            memory: self.memory.stats(),
            disk: self.disk.stats().await?,
        })
    }

    /// Wait for queued disk work and shut the disk tier down
    pub async fn close(&self) {
        self.disk.close().await;
        info!(name = %self.name, "Closed tiered cache");
    }
}

/// Hand a disk hit back to the caller, caching it in memory unless a write
/// has landed since the read was issued at sequence `seen`
fn promote(memory: &Memory, writes: &Mutex<u64>, seen: u64, key: &str, bytes: Vec<u8>) -> Value {
    let value = Value::from(bytes);
    let writes = writes.lock();
    if *writes == seen && memory.set_if_absent(key.to_string(), value.clone(), DEFAULT_COST) {
        debug!(key = %key, "Promoted disk hit into memory");
    } else {
        debug!(key = %key, "Kept newer memory state over disk hit");
    }
    value
}

impl LifecycleObserver for TieredCache {
    fn memory_pressure(&self) {
        self.handle_memory_pressure();
    }

    fn backgrounded(&self) {
        self.handle_backgrounded();
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.name)
            .field("disk", &self.disk)
            .finish_non_exhaustive()
    }
}
