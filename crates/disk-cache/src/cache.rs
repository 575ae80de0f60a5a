//! Disk cache handle
//!
//! Every operation is a command for the lane. Each comes in three forms: an
//! async method, a `*_blocking` method for threads outside the runtime, and a
//! `*_with_callback` method that returns immediately and completes on the lane.

use crate::error::{DiskCacheError, Result};
use crate::lane::{spawn_trimmer, Command, Lane, Reply, TrimTarget};
use crate::storage::Store;
use crate::types::{DiskCacheConfig, DiskCacheStats, DiskItem, DiskLimits};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Persistent key/value cache backed by a SQLite manifest and a content directory
///
/// Blocking variants wait on the lane and must not be called from inside the
/// async runtime. Callbacks run on the lane, so they must not block on this
/// cache either.
pub struct DiskCache {
    name: Option<String>,
    path: PathBuf,
    tx: UnboundedSender<Command>,
    limits: Mutex<DiskLimits>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiskCache {
    /// Open the cache at `config.path`, creating it if needed
    ///
    /// The store is reconciled before this returns. Fails with
    /// [`DiskCacheError::Init`] when the location cannot be used.
    pub async fn open(config: DiskCacheConfig) -> Result<Self> {
        if config.path.as_os_str().is_empty() {
            return Err(DiskCacheError::Config("cache path is empty".to_string()));
        }

        let store = Store::open(&config.path, config.inline_threshold)
            .await
            .map_err(|e| {
                error!(path = %config.path.display(), error = %e, "Failed to open disk cache");
                DiskCacheError::Init(format!("{}: {}", config.path.display(), e))
            })?;

        let limits = config.limits();
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut tasks = vec![Lane::new(store, rx, limits).spawn()];
        if !config.auto_trim_interval.is_zero() {
            tasks.push(spawn_trimmer(
                tx.downgrade(),
                config.auto_trim_interval,
                shutdown_rx,
            ));
        }

        info!(
            name = ?config.name,
            path = %config.path.display(),
            inline_threshold = config.inline_threshold,
            "Opened disk cache"
        );

        Ok(Self {
            name: config.name,
            path: config.path,
            tx,
            limits: Mutex::new(limits),
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn limits(&self) -> DiskLimits {
        *self.limits.lock()
    }

    /// Replace the limits enforced by the background trim task
    pub fn set_limits(&self, limits: DiskLimits) {
        *self.limits.lock() = limits;
        let _ = self.submit(Command::SetLimits(limits));
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|e| {
            e.0.reject();
            DiskCacheError::LaneClosed
        })
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.submit(command(Reply::Channel(tx)))?;
        rx.await.map_err(|_| DiskCacheError::LaneClosed)
    }

    fn request_blocking<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.submit(command(Reply::Channel(tx)))?;
        rx.blocking_recv().map_err(|_| DiskCacheError::LaneClosed)
    }

    fn request_with_callback<T: 'static>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
        callback: impl FnOnce(T) + Send + 'static,
    ) {
        // A closed lane still completes the callback through `reject`
        let _ = self.submit(command(Reply::Callback(Box::new(callback))));
    }

    // Lookups

    pub async fn contains_key(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.request(|reply| Command::Contains { key, reply }).await
    }

    pub fn contains_key_blocking(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.request_blocking(|reply| Command::Contains { key, reply })
    }

    pub fn contains_key_with_callback(
        &self,
        key: &str,
        callback: impl FnOnce(bool) + Send + 'static,
    ) {
        let key = key.to_string();
        self.request_with_callback(|reply| Command::Contains { key, reply }, callback);
    }

    /// Read a value. Unreadable entries are reported as absent.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_item(key).await?.map(|item| item.value))
    }

    pub fn get_blocking(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_item_blocking(key)?.map(|item| item.value))
    }

    pub fn get_with_callback(
        &self,
        key: &str,
        callback: impl FnOnce(Option<Vec<u8>>) + Send + 'static,
    ) {
        self.get_item_with_callback(key, move |item| callback(item.map(|item| item.value)));
    }

    /// Read a value together with its manifest metadata
    pub async fn get_item(&self, key: &str) -> Result<Option<DiskItem>> {
        let key = key.to_string();
        self.request(|reply| Command::Get { key, reply }).await
    }

    pub fn get_item_blocking(&self, key: &str) -> Result<Option<DiskItem>> {
        let key = key.to_string();
        self.request_blocking(|reply| Command::Get { key, reply })
    }

    pub fn get_item_with_callback(
        &self,
        key: &str,
        callback: impl FnOnce(Option<DiskItem>) + Send + 'static,
    ) {
        let key = key.to_string();
        self.request_with_callback(|reply| Command::Get { key, reply }, callback);
    }

    // Writes

    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.set_with_extended(key, value, None).await
    }

    pub fn set_blocking(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.set_with_extended_blocking(key, value, None)
    }

    pub fn set_with_callback(
        &self,
        key: &str,
        value: Vec<u8>,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        let key = key.to_string();
        self.request_with_callback(
            |reply| Command::Set {
                key,
                value,
                extended: None,
                reply,
            },
            callback,
        );
    }

    /// Store a value with an opaque metadata blob kept alongside it
    pub async fn set_with_extended(
        &self,
        key: &str,
        value: Vec<u8>,
        extended: Option<Vec<u8>>,
    ) -> Result<()> {
        let key = key.to_string();
        self.request(|reply| Command::Set {
            key,
            value,
            extended,
            reply,
        })
        .await?
    }

    pub fn set_with_extended_blocking(
        &self,
        key: &str,
        value: Vec<u8>,
        extended: Option<Vec<u8>>,
    ) -> Result<()> {
        let key = key.to_string();
        self.request_blocking(|reply| Command::Set {
            key,
            value,
            extended,
            reply,
        })?
    }

    /// Queue a write whose outcome is only logged
    pub fn set_detached(&self, key: &str, value: Vec<u8>) {
        let command = Command::Set {
            key: key.to_string(),
            value,
            extended: None,
            reply: Reply::Detached,
        };
        if self.submit(command).is_err() {
            warn!(key = %key, "Disk cache is closed, dropping write");
        }
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.request(|reply| Command::Remove { key, reply }).await?
    }

    pub fn remove_blocking(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.request_blocking(|reply| Command::Remove { key, reply })?
    }

    pub fn remove_with_callback(
        &self,
        key: &str,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        let key = key.to_string();
        self.request_with_callback(|reply| Command::Remove { key, reply }, callback);
    }

    pub async fn remove_all(&self) -> Result<()> {
        self.request(|reply| Command::RemoveAll {
            progress: None,
            reply,
        })
        .await?
    }

    pub fn remove_all_blocking(&self) -> Result<()> {
        self.request_blocking(|reply| Command::RemoveAll {
            progress: None,
            reply,
        })?
    }

    pub fn remove_all_with_callback(&self, callback: impl FnOnce(Result<()>) + Send + 'static) {
        self.request_with_callback(
            |reply| Command::RemoveAll {
                progress: None,
                reply,
            },
            callback,
        );
    }

    /// Remove every entry, oldest first
    ///
    /// `progress` receives `(removed, total)` after each entry and `end`
    /// receives the outcome. Both run on the lane.
    pub fn remove_all_with_progress(
        &self,
        progress: impl FnMut(usize, usize) + Send + 'static,
        end: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.request_with_callback(
            |reply| Command::RemoveAll {
                progress: Some(Box::new(progress)),
                reply,
            },
            end,
        );
    }

    // Trimming

    pub async fn trim_to_count(&self, count: u64) -> Result<()> {
        self.trim(TrimTarget::Count(count)).await
    }

    pub async fn trim_to_cost(&self, cost: u64) -> Result<()> {
        self.trim(TrimTarget::Cost(cost)).await
    }

    /// Remove entries not accessed within `age`
    pub async fn trim_to_age(&self, age: Duration) -> Result<()> {
        self.trim(TrimTarget::Age(age)).await
    }

    async fn trim(&self, target: TrimTarget) -> Result<()> {
        self.request(|reply| Command::Trim { target, reply }).await?
    }

    pub fn trim_to_count_blocking(&self, count: u64) -> Result<()> {
        self.trim_blocking(TrimTarget::Count(count))
    }

    pub fn trim_to_cost_blocking(&self, cost: u64) -> Result<()> {
        self.trim_blocking(TrimTarget::Cost(cost))
    }

    pub fn trim_to_age_blocking(&self, age: Duration) -> Result<()> {
        self.trim_blocking(TrimTarget::Age(age))
    }

    fn trim_blocking(&self, target: TrimTarget) -> Result<()> {
        self.request_blocking(|reply| Command::Trim { target, reply })?
    }

    pub fn trim_to_count_with_callback(
        &self,
        count: u64,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.trim_with_callback(TrimTarget::Count(count), callback);
    }

    pub fn trim_to_cost_with_callback(
        &self,
        cost: u64,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.trim_with_callback(TrimTarget::Cost(cost), callback);
    }

    pub fn trim_to_age_with_callback(
        &self,
        age: Duration,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.trim_with_callback(TrimTarget::Age(age), callback);
    }

    fn trim_with_callback(
        &self,
        target: TrimTarget,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.request_with_callback(|reply| Command::Trim { target, reply }, callback);
    }

    // Totals

    pub async fn total_count(&self) -> Result<u64> {
        Ok(self.request(|reply| Command::Totals { reply }).await??.0)
    }

    /// Total size of all stored values in bytes
    pub async fn total_cost(&self) -> Result<u64> {
        Ok(self.request(|reply| Command::Totals { reply }).await??.1)
    }

    pub fn total_count_blocking(&self) -> Result<u64> {
        Ok(self.request_blocking(|reply| Command::Totals { reply })??.0)
    }

    pub fn total_cost_blocking(&self) -> Result<u64> {
        Ok(self.request_blocking(|reply| Command::Totals { reply })??.1)
    }

    pub async fn stats(&self) -> Result<DiskCacheStats> {
        self.request(|reply| Command::Stats { reply }).await?
    }

    /// Finish queued work, stop the trim task and close the manifest
    ///
    /// Later operations fail with [`DiskCacheError::LaneClosed`].
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .submit(Command::Close {
                reply: Reply::Channel(tx),
            })
            .is_ok()
        {
            let _ = rx.await;
        }
        let _ = self.shutdown.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Disk cache task ended abnormally");
            }
        }
        info!(name = ?self.name, path = %self.path.display(), "Closed disk cache");
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        // The lane drains and exits once the last sender is gone
        let _ = self.shutdown.send(true);
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("limits", &self.limits())
            .finish_non_exhaustive()
    }
}
