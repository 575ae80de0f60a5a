//! Thread-safe LRU memory cache

use crate::lifecycle::LifecycleObserver;
use crate::lru::LruList;
use crate::release::ReleasePolicy;
use crate::types::{LifecycleCallback, MemoryCacheConfig, MemoryCacheStats};
use parking_lot::{Condvar, Mutex};
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Entries evicted per lock acquisition
const TRIM_BATCH: usize = 32;

/// Cost assigned by [`MemoryCache::set`]
pub const DEFAULT_COST: u64 = 1;

#[derive(Debug, Clone, Copy)]
struct Limits {
    count: usize,
    cost: u64,
    age: Duration,
}

struct State<K, V> {
    lru: LruList<K, V>,
    limits: Limits,
}

impl<K: Hash + Eq + Clone, V> State<K, V> {
    fn over_limits(&self) -> bool {
        self.lru.len() > self.limits.count || self.lru.total_cost() > self.limits.cost
    }
}

struct Shared<K, V> {
    name: Option<String>,
    state: Mutex<State<K, V>>,
    release: ReleasePolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    remove_all_on_memory_pressure: AtomicBool,
    remove_all_on_background: AtomicBool,
    on_memory_pressure: Option<LifecycleCallback>,
    on_background: Option<LifecycleCallback>,
}

impl<K, V> Shared<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    fn limits(&self) -> Limits {
        self.state.lock().limits
    }

    /// Evict from the tail while `over` holds, releasing the lock between batches
    fn evict_while(&self, over: impl Fn(&LruList<K, V>) -> bool) -> usize {
        let mut evicted = 0;
        loop {
            let mut batch = Vec::new();
            let done = {
                let mut state = self.state.lock();
                while batch.len() < TRIM_BATCH && over(&state.lru) {
                    match state.lru.pop_tail() {
                        Some(entry) => batch.push(entry),
                        None => break,
                    }
                }
                !over(&state.lru)
            };
            let drained = batch.is_empty();
            evicted += batch.len();
            if !drained {
                self.release.release(batch);
            }
            if done || drained {
                return evicted;
            }
        }
    }

    fn remove_all(&self) -> usize {
        let values = self.state.lock().lru.drain();
        let removed = values.len();
        if removed > 0 {
            self.release.release(values);
        }
        removed
    }

    fn trim_to_count(&self, count: usize) -> usize {
        if count == 0 {
            return self.remove_all();
        }
        self.evict_while(|lru| lru.len() > count)
    }

    fn trim_to_cost(&self, cost: u64) -> usize {
        if cost == 0 {
            return self.remove_all();
        }
        self.evict_while(|lru| lru.total_cost() > cost)
    }

    fn trim_to_age(&self, age: Duration) -> usize {
        if age.is_zero() {
            return self.remove_all();
        }
        let Some(cutoff) = Instant::now().checked_sub(age) else {
            return 0;
        };
        // Recency order is also access-time order, so the scan stops at the
        // first entry inside the window.
        self.evict_while(|lru| lru.tail_accessed_at().is_some_and(|at| at < cutoff))
    }

    fn auto_trim(&self) {
        let limits = self.limits();
        let evicted = self.trim_to_cost(limits.cost)
            + self.trim_to_count(limits.count)
            + self.trim_to_age(limits.age);
        if evicted > 0 {
            debug!(cache = ?self.name, evicted, "Background trim evicted entries");
        }
    }
}

/// Wakes the trimmer early on shutdown
#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    /// Sleep for `timeout` or until stopped. Returns true once stopped.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.cv.wait_for(&mut stopped, timeout);
        }
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cv.notify_all();
    }
}

struct Trimmer {
    stop: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Trimmer {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Memory cache trimmer panicked");
            }
        }
    }
}

/// A fast in-memory cache with least-recently-used eviction.
///
/// The cache is bounded by entry count, total cost and age. Limits are
/// enforced on every `set` and again by a background trimmer thread that is
/// stopped and joined when the cache is dropped. Evicted values are handed to
/// the configured release policy outside the lock.
///
/// Lookups, inserts and removals are O(1).
pub struct MemoryCache<K, V> {
    shared: Arc<Shared<K, V>>,
    _trimmer: Option<Trimmer>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    pub fn new(config: MemoryCacheConfig) -> Self {
        let release = ReleasePolicy::from_config(&config);
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            state: Mutex::new(State {
                lru: LruList::new(),
                limits: Limits {
                    count: config.count_limit,
                    cost: config.cost_limit,
                    age: config.age_limit,
                },
            }),
            release,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            remove_all_on_memory_pressure: AtomicBool::new(config.remove_all_on_memory_pressure),
            remove_all_on_background: AtomicBool::new(config.remove_all_on_background),
            on_memory_pressure: config.on_memory_pressure,
            on_background: config.on_background,
        });
        let trimmer = spawn_trimmer(shared.clone(), config.auto_trim_interval);
        Self {
            shared,
            _trimmer: trimmer,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.state.lock().lru.contains(key)
    }

    /// Get a value, marking it as most recently used
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let found = self
            .shared
            .state
            .lock()
            .lru
            .get(key, Instant::now())
            .cloned();
        let counter = if found.is_some() {
            &self.shared.hits
        } else {
            &self.shared.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store a value with [`DEFAULT_COST`]
    pub fn set(&self, key: K, value: V) {
        self.set_with_cost(key, value, DEFAULT_COST);
    }

    /// Store a value, evicting least recently used entries if a limit is exceeded
    pub fn set_with_cost(&self, key: K, value: V, cost: u64) {
        let (replaced, over_limits) = {
            let mut state = self.shared.state.lock();
            let replaced = state.lru.insert(key, value, cost, Instant::now());
            (replaced, state.over_limits())
        };
        if let Some(old) = replaced {
            self.shared.release.release(old);
        }
        if over_limits {
            let limits = self.shared.limits();
            self.shared.trim_to_cost(limits.cost);
            self.shared.trim_to_count(limits.count);
        }
    }

    /// Store a value only if `key` is absent. Returns whether it was stored.
    pub fn set_if_absent(&self, key: K, value: V, cost: u64) -> bool {
        let over_limits = {
            let mut state = self.shared.state.lock();
            if state.lru.contains(&key) {
                return false;
            }
            state.lru.insert(key, value, cost, Instant::now());
            state.over_limits()
        };
        if over_limits {
            let limits = self.shared.limits();
            self.shared.trim_to_cost(limits.cost);
            self.shared.trim_to_count(limits.count);
        }
        true
    }

    pub fn remove<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.shared.state.lock().lru.remove(key);
        if let Some(entry) = removed {
            self.shared.release.release(entry);
        }
    }

    pub fn remove_all(&self) {
        self.shared.remove_all();
    }

    /// Evict least recently used entries until at most `count` remain
    pub fn trim_to_count(&self, count: usize) {
        self.shared.trim_to_count(count);
    }

    /// Evict least recently used entries until the total cost is at most `cost`
    pub fn trim_to_cost(&self, cost: u64) {
        self.shared.trim_to_cost(cost);
    }

    /// Evict entries not accessed within `age`
    pub fn trim_to_age(&self, age: Duration) {
        self.shared.trim_to_age(age);
    }

    pub fn total_count(&self) -> usize {
        self.shared.state.lock().lru.len()
    }

    pub fn total_cost(&self) -> u64 {
        self.shared.state.lock().lru.total_cost()
    }

    pub fn count_limit(&self) -> usize {
        self.shared.limits().count
    }

    pub fn set_count_limit(&self, count: usize) {
        self.shared.state.lock().limits.count = count;
    }

    pub fn cost_limit(&self) -> u64 {
        self.shared.limits().cost
    }

    pub fn set_cost_limit(&self, cost: u64) {
        self.shared.state.lock().limits.cost = cost;
    }

    pub fn age_limit(&self) -> Duration {
        self.shared.limits().age
    }

    pub fn set_age_limit(&self, age: Duration) {
        self.shared.state.lock().limits.age = age;
    }

    pub fn set_remove_all_on_memory_pressure(&self, enabled: bool) {
        self.shared
            .remove_all_on_memory_pressure
            .store(enabled, Ordering::Relaxed);
    }

    pub fn set_remove_all_on_background(&self, enabled: bool) {
        self.shared
            .remove_all_on_background
            .store(enabled, Ordering::Relaxed);
    }

    /// React to a host memory-pressure signal
    pub fn handle_memory_pressure(&self) {
        if let Some(callback) = &self.shared.on_memory_pressure {
            callback(self.name());
        }
        if self
            .shared
            .remove_all_on_memory_pressure
            .load(Ordering::Relaxed)
        {
            let removed = self.shared.remove_all();
            info!(cache = ?self.shared.name, removed, "Cleared memory cache on memory pressure");
        }
    }

    /// React to the host moving to the background
    pub fn handle_backgrounded(&self) {
        if let Some(callback) = &self.shared.on_background {
            callback(self.name());
        }
        if self.shared.remove_all_on_background.load(Ordering::Relaxed) {
            let removed = self.shared.remove_all();
            info!(cache = ?self.shared.name, removed, "Cleared memory cache on entering background");
        }
    }

    pub fn stats(&self) -> MemoryCacheStats {
        let (entries, total_cost) = {
            let state = self.shared.state.lock();
            (state.lru.len(), state.lru.total_cost())
        };
        MemoryCacheStats {
            entries,
            total_cost,
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Default for MemoryCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

impl<K, V> LifecycleObserver for MemoryCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    fn memory_pressure(&self) {
        self.handle_memory_pressure();
    }

    fn backgrounded(&self) {
        self.handle_backgrounded();
    }
}

fn spawn_trimmer<K, V>(shared: Arc<Shared<K, V>>, interval: Duration) -> Option<Trimmer>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    if interval.is_zero() {
        return None;
    }
    let stop = Arc::new(StopSignal::default());
    let thread_stop = stop.clone();
    let thread_name = match &shared.name {
        Some(name) => format!("{}-trim", name),
        None => "memory-cache-trim".to_string(),
    };
    let spawned = thread::Builder::new().name(thread_name).spawn(move || {
        while !thread_stop.wait(interval) {
            shared.auto_trim();
        }
    });
    match spawned {
        Ok(handle) => Some(Trimmer {
            stop,
            handle: Some(handle),
        }),
        Err(e) => {
            warn!(error = %e, "Failed to start memory cache trimmer");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    fn inline_config() -> MemoryCacheConfig {
        MemoryCacheConfig {
            release_asynchronously: false,
            auto_trim_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    fn assert_consistent<K, V>(cache: &MemoryCache<K, V>)
    where
        K: Hash + Eq + Clone + Send + 'static,
        V: Send + 'static,
    {
        cache.shared.state.lock().lru.assert_consistent();
    }

    struct CountsDrops(Arc<AtomicUsize>);

    impl Drop for CountsDrops {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_set_and_get() {
        let cache = MemoryCache::new(inline_config());
        cache.set("key".to_string(), b"Hello, world!".to_vec());

        assert!(cache.contains_key("key"));
        assert_eq!(cache.get("key"), Some(b"Hello, world!".to_vec()));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.total_count(), 1);
        assert_eq!(cache.total_cost(), DEFAULT_COST);
    }

    #[test]
    fn test_count_limit_evicts_oldest() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            count_limit: 2,
            ..inline_config()
        });
        cache.set("A", "x");
        cache.set("B", "y");
        cache.set("C", "z");

        assert!(!cache.contains_key("A"));
        assert!(cache.contains_key("B"));
        assert!(cache.contains_key("C"));
        assert_eq!(cache.total_count(), 2);
        assert_consistent(&cache);
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            count_limit: 3,
            ..inline_config()
        });
        cache.set(1, ());
        cache.set(2, ());
        cache.set(3, ());
        assert!(cache.get(&1).is_some());

        cache.set(4, ());
        cache.set(5, ());

        assert!(cache.contains_key(&1));
        assert!(!cache.contains_key(&2));
        assert!(!cache.contains_key(&3));
        assert!(cache.contains_key(&4));
        assert!(cache.contains_key(&5));
        assert_consistent(&cache);
    }

    #[test]
    fn test_cost_limit_eviction() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            cost_limit: 100,
            ..inline_config()
        });
        cache.set_with_cost("a", 1, 40);
        cache.set_with_cost("b", 2, 40);
        cache.set_with_cost("c", 3, 40);

        assert!(!cache.contains_key("a"));
        assert_eq!(cache.total_cost(), 80);
        assert_consistent(&cache);

        // Replacing in place adjusts the total rather than adding to it
        cache.set_with_cost("b", 20, 10);
        assert_eq!(cache.total_cost(), 50);
        assert_eq!(cache.total_count(), 2);
        assert_consistent(&cache);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let cache = MemoryCache::new(inline_config());
        cache.set("k", 1);

        cache.remove("k");
        assert!(!cache.contains_key("k"));
        cache.remove("k");
        assert!(!cache.contains_key("k"));
        assert_eq!(cache.total_count(), 0);
        assert_consistent(&cache);
    }

    #[test]
    fn test_set_if_absent_keeps_existing_value() {
        let cache = MemoryCache::new(inline_config());
        assert!(cache.set_if_absent("k", 1, DEFAULT_COST));
        assert!(!cache.set_if_absent("k", 2, 5));
        assert_eq!(cache.get("k"), Some(1));
        assert_eq!(cache.total_cost(), DEFAULT_COST);
        assert_consistent(&cache);
    }

    #[test]
    fn test_max_cost_entry_does_not_overflow() {
        let cache = MemoryCache::new(inline_config());
        cache.set_with_cost("a", 1, u64::MAX);
        cache.set("b", 2);

        assert_eq!(cache.total_cost(), u64::MAX);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), Some(2));
        assert_consistent(&cache);

        cache.remove("a");
        assert_eq!(cache.total_cost(), DEFAULT_COST);
    }

    #[test]
    fn test_trim_to_count_and_cost() {
        let cache = MemoryCache::new(inline_config());
        for i in 0..100u64 {
            cache.set_with_cost(i, i, 2);
        }

        cache.trim_to_count(60);
        assert_eq!(cache.total_count(), 60);
        assert!(!cache.contains_key(&39));
        assert!(cache.contains_key(&40));

        cache.trim_to_cost(50);
        assert_eq!(cache.total_cost(), 50);
        assert!(cache.contains_key(&99));
        assert!(!cache.contains_key(&74));
        assert_consistent(&cache);

        cache.trim_to_count(0);
        assert_eq!(cache.total_count(), 0);
    }

    #[test]
    fn test_trim_to_age_stops_at_recent_entries() {
        let cache = MemoryCache::new(inline_config());
        cache.set("old", 1);
        thread::sleep(Duration::from_millis(80));
        cache.set("new", 2);

        cache.trim_to_age(Duration::from_millis(40));

        assert!(!cache.contains_key("old"));
        assert!(cache.contains_key("new"));
        assert_consistent(&cache);
    }

    #[test]
    fn test_eviction_releases_inline() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = MemoryCache::new(MemoryCacheConfig {
            count_limit: 1,
            ..inline_config()
        });
        cache.set(1, CountsDrops(drops.clone()));
        cache.set(2, CountsDrops(drops.clone()));
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        // Replacing a value releases the old one
        cache.set(2, CountsDrops(drops.clone()));
        assert_eq!(drops.load(Ordering::SeqCst), 2);

        cache.remove_all();
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_memory_pressure_clears_by_default() {
        let notified = Arc::new(AtomicUsize::new(0));
        let seen = notified.clone();
        let cache = MemoryCache::new(MemoryCacheConfig {
            name: Some("images".to_string()),
            on_memory_pressure: Some(Arc::new(move |name: Option<&str>| {
                assert_eq!(name, Some("images"));
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..inline_config()
        });
        cache.set("a", 1);

        cache.handle_memory_pressure();

        assert_eq!(cache.total_count(), 0);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backgrounded_keeps_entries_by_default() {
        let notified = Arc::new(AtomicUsize::new(0));
        let seen = notified.clone();
        let cache = MemoryCache::new(MemoryCacheConfig {
            on_background: Some(Arc::new(move |_: Option<&str>| {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..inline_config()
        });
        cache.set("a", 1);

        cache.handle_backgrounded();
        assert_eq!(cache.total_count(), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        cache.set_remove_all_on_background(true);
        cache.handle_backgrounded();
        assert_eq!(cache.total_count(), 0);
    }

    #[test]
    fn test_background_trimmer_enforces_age_limit() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            age_limit: Duration::from_millis(50),
            auto_trim_interval: Duration::from_millis(20),
            release_asynchronously: false,
            ..Default::default()
        });
        cache.set("a", 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.contains_key("a") && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!cache.contains_key("a"));
    }

    #[test]
    fn test_drop_joins_trimmer() {
        let cache: MemoryCache<String, u32> = MemoryCache::new(MemoryCacheConfig {
            auto_trim_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        let weak = Arc::downgrade(&cache.shared);

        drop(cache);

        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = MemoryCache::new(inline_config());
        cache.get("a");
        cache.set("a", 1);
        cache.get("a");
        cache.get("a");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_concurrent_disjoint_keys_keep_invariants() {
        let cache = Arc::new(MemoryCache::new(MemoryCacheConfig {
            auto_trim_interval: Duration::ZERO,
            ..Default::default()
        }));

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let mut rng = rand::rngs::StdRng::seed_from_u64(t);
                    let mut present = HashSet::new();
                    for _ in 0..2_000 {
                        let key = t * 1_000 + rng.gen_range(0..50);
                        match rng.gen_range(0..3) {
                            0 => {
                                cache.set_with_cost(key, key, rng.gen_range(1..10));
                                present.insert(key);
                            }
                            1 => {
                                assert_eq!(cache.get(&key).is_some(), present.contains(&key));
                            }
                            _ => {
                                cache.remove(&key);
                                present.remove(&key);
                            }
                        }
                    }
                    present
                })
            })
            .collect();

        let mut expected = HashSet::new();
        for handle in handles {
            expected.extend(handle.join().unwrap());
        }

        assert_eq!(cache.total_count(), expected.len());
        for key in &expected {
            assert!(cache.contains_key(key));
        }
        assert_consistent(&cache);
    }
}
