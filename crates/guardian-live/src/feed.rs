//! Change-feed subscriptions with reconnect and redelivery suppression.
//!
//! A [`Subscription`] owns one background task reading one channel. The
//! task reconnects with exponential backoff when the feed lags or closes,
//! resuming after the last sequence it delivered, and never hands the same
//! commit to the callback twice. Releasing the handle (explicitly or by
//! drop) stops delivery before `unsubscribe` returns.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use guardian_core::config::RealtimeConfig;
use guardian_state::{ChangeFilter, EventKind, FeedReceiver, Seq, StateStore, Table};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::error::{LiveError, LiveResult};

/// Source of change-feed channels.
pub trait ChangeSource: Send + Sync + 'static {
    fn open(
        &self,
        channel: &str,
        filter: &ChangeFilter,
        resume_after: Option<Seq>,
    ) -> LiveResult<FeedReceiver>;
}

impl ChangeSource for StateStore {
    fn open(
        &self,
        channel: &str,
        filter: &ChangeFilter,
        resume_after: Option<Seq>,
    ) -> LiveResult<FeedReceiver> {
        self.feed()
            .open(channel, filter.clone(), resume_after)
            .map_err(|e| LiveError::SubscribeFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Give up after this many consecutive failed reopen attempts.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

impl From<&RealtimeConfig> for ReconnectPolicy {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            base: config.reconnect_base(),
            max: config.reconnect_max(),
            max_attempts: None,
        }
    }
}

/// Connection state changes reported by a subscription task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedStatus {
    Interrupted { channel: String, reason: String },
    Reconnected { channel: String, attempts: u32 },
    GaveUp { channel: String, attempts: u32 },
}

/// Row callback invoked once per delivered insert.
pub type RowCallback = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Callback invoked on connection state changes.
pub type StatusCallback = Arc<dyn Fn(FeedStatus) + Send + Sync>;

type SubscriptionKey = (Table, Option<EventKind>);

/// Opens subscriptions for one view and refuses duplicates per
/// `{table, event}` while a handle for it is live.
pub struct ChangeFeedSubscriber {
    source: Arc<dyn ChangeSource>,
    policy: ReconnectPolicy,
    active: Arc<Mutex<HashSet<SubscriptionKey>>>,
    on_status: Option<StatusCallback>,
}

impl ChangeFeedSubscriber {
    pub fn new(source: Arc<dyn ChangeSource>, policy: ReconnectPolicy) -> Self {
        Self {
            source,
            policy,
            active: Arc::new(Mutex::new(HashSet::new())),
            on_status: None,
        }
    }

    /// Set a callback for connection state changes.
    pub fn with_status_callback(mut self, cb: StatusCallback) -> Self {
        self.on_status = Some(cb);
        self
    }

    /// Subscribe to `filter` on `channel`. Must be called inside a Tokio runtime.
    ///
    /// Open failures are returned, never swallowed. Rows are handed to
    /// `on_row` in commit order, once each, until the handle is released.
    pub fn subscribe<F>(
        &self,
        channel: &str,
        filter: ChangeFilter,
        on_row: F,
    ) -> LiveResult<Subscription>
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        let key = (filter.table, filter.event);
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if !active.insert(key) {
                return Err(LiveError::DuplicateSubscription {
                    table: filter.table,
                    event: filter.event,
                });
            }
        }

        let rx = match self.source.open(channel, &filter, None) {
            Ok(rx) => rx,
            Err(e) => {
                self.release_key(&key);
                warn!(%channel, table = %filter.table, error = %e, "subscribe failed");
                return Err(e);
            }
        };

        let open = Arc::new(Mutex::new(true));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = FeedTask {
            source: self.source.clone(),
            channel: channel.to_string(),
            filter,
            callback: Arc::new(on_row),
            on_status: self.on_status.clone(),
            open: open.clone(),
            policy: self.policy.clone(),
        };
        let handle = tokio::spawn(task.run(rx, shutdown_rx));

        info!(%channel, table = %key.0, "subscribed");
        Ok(Subscription {
            channel: channel.to_string(),
            key,
            open,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
            registry: self.active.clone(),
        })
    }

    /// Number of live subscriptions opened through this subscriber.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn release_key(&self, key: &SubscriptionKey) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Handle to one open subscription.
///
/// `unsubscribe` is idempotent. Dropping the handle unsubscribes.
/// Callbacks must not release their own subscription.
pub struct Subscription {
    channel: String,
    key: SubscriptionKey,
    /// Held while a callback runs; `false` once released.
    open: Arc<Mutex<bool>>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<Mutex<HashSet<SubscriptionKey>>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        {
            let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
            if !*open {
                return;
            }
            *open = false;
        }
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
        info!(channel = %self.channel, "unsubscribed");
    }

    pub fn is_closed(&self) -> bool {
        !*self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn table(&self) -> Table {
        self.key.0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct FeedTask {
    source: Arc<dyn ChangeSource>,
    channel: String,
    filter: ChangeFilter,
    callback: RowCallback,
    on_status: Option<StatusCallback>,
    open: Arc<Mutex<bool>>,
    policy: ReconnectPolicy,
}

impl FeedTask {
    async fn run(self, mut rx: FeedReceiver, mut shutdown: watch::Receiver<bool>) {
        let mut last_seq: Option<Seq> = None;
        let mut backoff = Backoff::new(self.policy.base, self.policy.max);

        loop {
            let reason = loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        debug!(channel = %self.channel, "feed task shutting down");
                        return;
                    }
                    result = rx.recv() => match result {
                        Ok(event) => {
                            if last_seq.is_some_and(|last| event.seq <= last) {
                                debug!(channel = %self.channel, seq = event.seq, "redelivered event discarded");
                                continue;
                            }
                            last_seq = Some(event.seq);
                            if !self.deliver(event.record) {
                                return;
                            }
                        }
                        Err(e) => break e.to_string(),
                    }
                }
            };

            warn!(channel = %self.channel, %reason, "change feed interrupted");
            self.report(FeedStatus::Interrupted {
                channel: self.channel.clone(),
                reason,
            });
            // Release the channel name before reopening it.
            drop(rx);

            rx = loop {
                let delay = backoff.next_delay();
                if self
                    .policy
                    .max_attempts
                    .is_some_and(|max| backoff.attempts() > max)
                {
                    error!(channel = %self.channel, attempts = backoff.attempts() - 1, "giving up on change feed");
                    self.report(FeedStatus::GaveUp {
                        channel: self.channel.clone(),
                        attempts: backoff.attempts() - 1,
                    });
                    return;
                }
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                match self.source.open(&self.channel, &self.filter, last_seq) {
                    Ok(rx) => {
                        info!(channel = %self.channel, attempts = backoff.attempts(), "change feed reconnected");
                        self.report(FeedStatus::Reconnected {
                            channel: self.channel.clone(),
                            attempts: backoff.attempts(),
                        });
                        backoff.reset();
                        break rx;
                    }
                    Err(e) => {
                        warn!(channel = %self.channel, ?delay, error = %e, "reconnect attempt failed");
                    }
                }
            };
        }
    }

    /// Hand one row to the callback unless released. Returns `false` once released.
    fn deliver(&self, record: serde_json::Value) -> bool {
        let open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        if !*open {
            return false;
        }
        (self.callback)(record);
        true
    }

    fn report(&self, status: FeedStatus) {
        if let Some(cb) = &self.on_status {
            cb(status);
        }
    }
}
