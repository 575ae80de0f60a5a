//! Serialized execution lane
//!
//! A single task owns the [`Store`] and applies commands in submission order.
//! Trims run one batch at a time so commands that arrive mid-trim are not
//! held up behind it. An explicit trim only touches records whose access
//! ordinal predates it, so later writes and reads survive it.

use crate::error::{DiskCacheError, Result};
use crate::storage::Store;
use crate::types::{DiskCacheStats, DiskItem, DiskLimits};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

pub(crate) type ProgressFn = Box<dyn FnMut(usize, usize) + Send>;

/// Where a command's result goes
pub(crate) enum Reply<T> {
    Channel(oneshot::Sender<T>),
    Callback(Box<dyn FnOnce(T) + Send>),
    Detached,
}

impl<T> Reply<T> {
    pub fn send(self, value: T) {
        match self {
            Reply::Channel(tx) => {
                // Receiver gone means the caller stopped waiting
                let _ = tx.send(value);
            }
            Reply::Callback(callback) => callback(value),
            Reply::Detached => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrimTarget {
    Count(u64),
    Cost(u64),
    Age(Duration),
}

pub(crate) enum Command {
    Contains {
        key: String,
        reply: Reply<bool>,
    },
    Get {
        key: String,
        reply: Reply<Option<DiskItem>>,
    },
    Set {
        key: String,
        value: Vec<u8>,
        extended: Option<Vec<u8>>,
        reply: Reply<Result<()>>,
    },
    Remove {
        key: String,
        reply: Reply<Result<()>>,
    },
    RemoveAll {
        progress: Option<ProgressFn>,
        reply: Reply<Result<()>>,
    },
    Trim {
        target: TrimTarget,
        reply: Reply<Result<()>>,
    },
    AutoTrim,
    SetLimits(DiskLimits),
    Totals {
        reply: Reply<Result<(u64, u64)>>,
    },
    Stats {
        reply: Reply<Result<DiskCacheStats>>,
    },
    Close {
        reply: Reply<()>,
    },
}

impl Command {
    /// Complete the command without running it
    pub fn reject(self) {
        match self {
            Command::Contains { reply, .. } => reply.send(false),
            Command::Get { reply, .. } => reply.send(None),
            Command::Set { reply, .. }
            | Command::Remove { reply, .. }
            | Command::RemoveAll { reply, .. }
            | Command::Trim { reply, .. } => reply.send(Err(DiskCacheError::LaneClosed)),
            Command::Totals { reply } => reply.send(Err(DiskCacheError::LaneClosed)),
            Command::Stats { reply } => reply.send(Err(DiskCacheError::LaneClosed)),
            Command::Close { reply } => reply.send(()),
            Command::AutoTrim | Command::SetLimits(_) => {}
        }
    }
}

struct PendingTrim {
    target: TrimTarget,
    /// Highest access ordinal this trim may remove
    ceiling: i64,
    reply: Reply<Result<()>>,
}

pub(crate) struct Lane {
    store: Store,
    rx: UnboundedReceiver<Command>,
    limits: DiskLimits,
    pending: VecDeque<PendingTrim>,
}

impl Lane {
    pub fn new(store: Store, rx: UnboundedReceiver<Command>, limits: DiskLimits) -> Self {
        Self {
            store,
            rx,
            limits,
            pending: VecDeque::new(),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut close_reply = None;
        loop {
            let command = if self.pending.is_empty() {
                match self.rx.recv().await {
                    Some(command) => Some(command),
                    None => break,
                }
            } else {
                match self.rx.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            };

            if let Some(command) = command {
                if let Some(reply) = self.handle(command).await {
                    close_reply = Some(reply);
                    break;
                }
            }
            self.trim_step().await;
        }

        while !self.pending.is_empty() {
            self.trim_step().await;
        }
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            command.reject();
        }
        self.store.close().await;
        debug!("Disk cache lane stopped");

        if let Some(reply) = close_reply {
            reply.send(());
        }
    }

    /// Apply one command. Returns the reply of a close request.
    async fn handle(&mut self, command: Command) -> Option<Reply<()>> {
        match command {
            Command::Contains { key, reply } => {
                let found = match self.store.contains(&key).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to look up key");
                        false
                    }
                };
                reply.send(found);
            }
            Command::Get { key, reply } => {
                let item = match self.store.get_item(&key).await {
                    Ok(item) => item,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to read from disk cache");
                        None
                    }
                };
                reply.send(item);
            }
            Command::Set {
                key,
                value,
                extended,
                reply,
            } => {
                let result = self.store.set(&key, &value, extended.as_deref()).await;
                if let Err(e) = &result {
                    warn!(key = %key, size = value.len(), error = %e, "Failed to write to disk cache");
                }
                reply.send(result);
            }
            Command::Remove { key, reply } => {
                let result = self.store.remove(&key).await.map(|existed| {
                    if existed {
                        debug!(key = %key, "Removed from disk cache");
                    }
                });
                reply.send(result);
            }
            Command::RemoveAll { progress, reply } => {
                let result = match progress {
                    Some(mut progress) => {
                        self.store
                            .remove_all_with_progress(progress.as_mut())
                            .await
                    }
                    None => self.store.remove_all().await,
                };
                reply.send(result);
            }
            Command::Trim { target, reply } => {
                self.pending.push_back(PendingTrim {
                    target,
                    ceiling: self.store.last_ordinal(),
                    reply,
                });
            }
            Command::AutoTrim => self.schedule_auto_trim(),
            Command::SetLimits(limits) => self.limits = limits,
            Command::Totals { reply } => {
                let totals = self
                    .store
                    .counts()
                    .await
                    .map(|(count, size, _)| (count as u64, size as u64));
                reply.send(totals);
            }
            Command::Stats { reply } => reply.send(self.store.stats().await),
            Command::Close { reply } => return Some(reply),
        }
        None
    }

    fn schedule_auto_trim(&mut self) {
        // A previous round is still in progress
        if !self.pending.is_empty() {
            return;
        }
        let limits = self.limits;
        if limits.count < u64::MAX {
            self.pending.push_back(PendingTrim {
                target: TrimTarget::Count(limits.count),
                ceiling: i64::MAX,
                reply: Reply::Detached,
            });
        }
        if limits.cost < u64::MAX {
            self.pending.push_back(PendingTrim {
                target: TrimTarget::Cost(limits.cost),
                ceiling: i64::MAX,
                reply: Reply::Detached,
            });
        }
        if limits.age < Duration::MAX {
            self.pending.push_back(PendingTrim {
                target: TrimTarget::Age(limits.age),
                ceiling: i64::MAX,
                reply: Reply::Detached,
            });
        }
    }

    /// Run one batch of the oldest pending trim
    async fn trim_step(&mut self) {
        let Some(trim) = self.pending.pop_front() else {
            return;
        };
        let step = match trim.target {
            TrimTarget::Count(limit) => self.store.trim_count_step(limit, trim.ceiling).await,
            TrimTarget::Cost(limit) => self.store.trim_cost_step(limit, trim.ceiling).await,
            TrimTarget::Age(age) => self.store.trim_age_step(age, trim.ceiling).await,
        };
        match step {
            Ok(true) => self.pending.push_front(trim),
            Ok(false) => trim.reply.send(Ok(())),
            Err(e) => {
                warn!(trim = ?trim.target, error = %e, "Disk cache trim failed");
                trim.reply.send(Err(e));
            }
        }
    }
}

/// Periodically ask the lane to enforce its limits until shutdown
pub(crate) fn spawn_trimmer(
    tx: WeakUnboundedSender<Command>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(tx) = tx.upgrade() else { break };
                    if tx.send(Command::AutoTrim).is_err() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Disk cache trim task stopped");
    })
}
