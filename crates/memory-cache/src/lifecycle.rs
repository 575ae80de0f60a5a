//! Host lifecycle signal fan-out
//!
//! The embedding process owns the platform hooks for memory pressure and
//! backgrounding. It subscribes caches to a [`LifecycleHub`] and forwards
//! each signal; the hub only keeps weak references.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Something that reacts to host lifecycle signals
pub trait LifecycleObserver: Send + Sync {
    fn memory_pressure(&self);
    fn backgrounded(&self);
}

#[derive(Default, Clone)]
pub struct LifecycleHub {
    observers: Arc<RwLock<Vec<Weak<dyn LifecycleObserver>>>>,
}

impl LifecycleHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: &Arc<dyn LifecycleObserver>) {
        self.observers.write().push(Arc::downgrade(observer));
    }

    /// Forward a memory-pressure signal, returning how many observers saw it
    pub fn notify_memory_pressure(&self) -> usize {
        self.for_each_live(|observer| observer.memory_pressure())
    }

    /// Forward a backgrounding signal, returning how many observers saw it
    pub fn notify_backgrounded(&self) -> usize {
        self.for_each_live(|observer| observer.backgrounded())
    }

    fn for_each_live(&self, f: impl Fn(&dyn LifecycleObserver)) -> usize {
        let live: Vec<Arc<dyn LifecycleObserver>> = {
            let mut observers = self.observers.write();
            observers.retain(|weak| weak.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in &live {
            f(observer.as_ref());
        }
        live.len()
    }
}
