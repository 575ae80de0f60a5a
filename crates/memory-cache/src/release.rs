//! Disposal of evicted values away from the access path

use crate::types::MemoryCacheConfig;
use std::fmt;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Garbage = Box<dyn Send>;

/// A single named thread that drops whatever it is handed.
///
/// Values with thread-affine teardown can be routed to one designated
/// executor shared by every cache in the process.
#[derive(Clone)]
pub struct ReleaseExecutor {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Garbage>,
}

impl ReleaseExecutor {
    /// Start the executor thread. It exits once every handle is dropped.
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Garbage>();
        let thread_name = name.to_string();
        thread::Builder::new().name(thread_name).spawn(move || {
            while let Some(garbage) = rx.blocking_recv() {
                drop(garbage);
            }
        })?;
        debug!(executor = name, "Release executor started");
        Ok(Self {
            name: name.into(),
            tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn release<T: Send + 'static>(&self, garbage: T) {
        // Executor thread is gone: fall back to dropping here.
        if let Err(mpsc::error::SendError(garbage)) = self.tx.send(Box::new(garbage)) {
            drop(garbage);
        }
    }
}

impl fmt::Debug for ReleaseExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseExecutor")
            .field("name", &self.name)
            .finish()
    }
}

lazy_static::lazy_static! {
    static ref BACKGROUND: Option<ReleaseExecutor> = spawn_global("memory-cache-release");
    static ref DESIGNATED: Option<ReleaseExecutor> = spawn_global("memory-cache-designated");
}

fn spawn_global(name: &str) -> Option<ReleaseExecutor> {
    match ReleaseExecutor::spawn(name) {
        Ok(executor) => Some(executor),
        Err(e) => {
            warn!(executor = name, error = %e, "Failed to start release executor, releasing inline");
            None
        }
    }
}

/// Where evicted values are dropped
#[derive(Clone, Debug)]
pub(crate) enum ReleasePolicy {
    Inline,
    Executor(ReleaseExecutor),
}

impl ReleasePolicy {
    pub fn from_config(config: &MemoryCacheConfig) -> Self {
        let executor = if config.release_on_designated_thread {
            config
                .designated_executor
                .clone()
                .or_else(|| DESIGNATED.clone())
        } else if config.release_asynchronously {
            BACKGROUND.clone()
        } else {
            None
        };
        executor.map_or(ReleasePolicy::Inline, ReleasePolicy::Executor)
    }

    pub fn release<T: Send + 'static>(&self, garbage: T) {
        match self {
            ReleasePolicy::Inline => drop(garbage),
            ReleasePolicy::Executor(executor) => executor.release(garbage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    struct ReportsDropThread(std_mpsc::Sender<Option<String>>);

    impl Drop for ReportsDropThread {
        fn drop(&mut self) {
            let name = thread::current().name().map(str::to_string);
            let _ = self.0.send(name);
        }
    }

    #[test]
    fn test_executor_drops_on_its_own_thread() {
        let executor = ReleaseExecutor::spawn("test-release").unwrap();
        let (tx, rx) = std_mpsc::channel();

        executor.release(ReportsDropThread(tx));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-release"));
        assert_eq!(executor.name(), "test-release");
    }

    #[test]
    fn test_inline_policy_drops_immediately() {
        let (tx, rx) = std_mpsc::channel();
        ReleasePolicy::Inline.release(ReportsDropThread(tx));
        let name = rx.try_recv().unwrap();
        assert_eq!(name, thread::current().name().map(str::to_string));
    }

    #[test]
    fn test_policy_from_config() {
        let config = MemoryCacheConfig {
            release_asynchronously: false,
            ..Default::default()
        };
        assert!(matches!(
            ReleasePolicy::from_config(&config),
            ReleasePolicy::Inline
        ));

        let designated = ReleaseExecutor::spawn("test-designated").unwrap();
        let config = MemoryCacheConfig {
            release_asynchronously: false,
            release_on_designated_thread: true,
            designated_executor: Some(designated),
            ..Default::default()
        };
        match ReleasePolicy::from_config(&config) {
            ReleasePolicy::Executor(executor) => assert_eq!(executor.name(), "test-designated"),
            other => panic!("expected designated executor, got {:?}", other),
        }
    }
}
