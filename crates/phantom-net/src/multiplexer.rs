//! Readiness multiplexer
//!
//! Watches connected channels for incoming-data readiness and delivers a
//! registered callback on the scheduler's execution context, never from the
//! I/O task that observed the readiness.
//!
//! Notifications are edge-triggered and single-shot: one registration yields
//! at most one callback invocation, and the callback must re-register to be
//! notified again. Explicit re-arming keeps the reactor fair (a chatty
//! connection cannot monopolize the loop) while still guaranteeing every
//! readiness event is observed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use phantom_sched::{ExecutorHandle, TaskGroupId};
use tokio::io::Interest;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, trace, warn};

use crate::channel::{ChannelId, DataChannel};

/// What a readiness watch observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Data is available to read
    Readable,
    /// The peer hung up with nothing left to read
    ///
    /// A hangup with data still pending is delivered as `Readable`; the
    /// remaining bytes drain normally and `receive` reports `Closed` at the
    /// end of the stream.
    Closed,
}

struct Inner {
    executor: ExecutorHandle,
    io_group: TaskGroupId,
    watches: Mutex<HashMap<ChannelId, JoinHandle<()>>>,
}

/// Single-shot readable watches delivered on the execution context
#[derive(Clone)]
pub struct ReadinessMultiplexer {
    inner: Arc<Inner>,
}

impl ReadinessMultiplexer {
    /// Create a multiplexer delivering callbacks through the given executor
    pub fn new(executor: ExecutorHandle) -> Self {
        let io_group = executor.new_group();
        Self {
            inner: Arc::new(Inner {
                executor,
                io_group,
                watches: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a one-shot readable watch on a channel
    ///
    /// The callback runs on the executor exactly once per registration.
    /// Registering again for the same channel replaces the previous watch,
    /// so a single registration can never deliver twice. Hangups deregister
    /// the channel automatically.
    pub fn watch_for_readable(
        &self,
        channel: &DataChannel,
        callback: impl FnOnce(DataChannel, ChannelEvent) + Send + 'static,
    ) {
        let inner = self.inner.clone();
        let channel = channel.clone();
        let id = channel.id();

        let watcher = tokio::spawn(async move {
            let event = match channel.stream().ready(Interest::READABLE).await {
                Ok(ready) if ready.is_read_closed() && !ready.is_readable() => ChannelEvent::Closed,
                Ok(_) => ChannelEvent::Readable,
                Err(e) => {
                    debug!("readiness wait failed on {:?}: {}", id, e);
                    ChannelEvent::Closed
                }
            };
            trace!("channel {:?} ready: {:?}", id, event);
            inner.watches.lock().unwrap().remove(&id);

            let mut callback = Some(callback);
            let result = inner.executor.schedule(inner.io_group, Duration::ZERO, move || {
                if let Some(callback) = callback.take() {
                    callback(channel.clone(), event);
                }
            });
            if result.is_err() {
                debug!("dropping readiness event for {:?}: executor shut down", id);
            }
        });

        let mut watches = self.inner.watches.lock().unwrap();
        if let Some(stale) = watches.insert(id, watcher) {
            // A finished handle means the previous watch already delivered
            // and raced this re-registration; only a live watch is replaced.
            if stale.is_finished() {
                debug!("dropping completed watch entry for channel {:?}", id);
            } else {
                warn!("replacing existing watch for channel {:?}", id);
                stale.abort();
            }
        }
    }

    /// Drop any pending watch for a channel
    pub fn unwatch(&self, id: ChannelId) {
        if let Some(watcher) = self.inner.watches.lock().unwrap().remove(&id) {
            watcher.abort();
        }
    }

    /// Abort all watches and cancel undelivered readiness callbacks
    pub fn close(&self) {
        let mut watches = self.inner.watches.lock().unwrap();
        for (_, watcher) in watches.drain() {
            watcher.abort();
        }
        self.inner.executor.cancel_group(self.inner.io_group);
    }
}
