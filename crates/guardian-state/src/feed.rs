//! Change feed — publish/subscribe over committed row changes.
//!
//! The store publishes one [`ChangeEvent`] per committed mutation. Readers
//! open a named channel with a [`ChangeFilter`] and receive matching events
//! through a [`FeedReceiver`]. Opening with `resume_after` first replays
//! retained events newer than that sequence, then continues live.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::types::{ChangeEvent, EventKind, Seq, Table};

/// Errors surfaced while reading from an open channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The receiver fell behind and `n` events were skipped.
    #[error("feed lagged, {0} events skipped")]
    Lagged(u64),

    /// The publishing side went away.
    #[error("feed closed")]
    Closed,
}

/// Filter applied to a channel: schema, table and (optionally) event kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeFilter {
    pub schema: String,
    pub table: Table,
    /// `None` matches every kind.
    pub event: Option<EventKind>,
}

impl ChangeFilter {
    /// Filter for row inserts on one table.
    pub fn inserts(schema: impl Into<String>, table: Table) -> Self {
        Self {
            schema: schema.into(),
            table,
            event: Some(EventKind::Insert),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.schema == self.schema
            && event.table == self.table
            && self.event.is_none_or(|kind| kind == event.kind)
    }
}

/// Shared publish side of the feed. Cheap to clone.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
    backlog: Arc<Mutex<VecDeque<ChangeEvent>>>,
    backlog_capacity: usize,
    channels: Arc<Mutex<HashSet<String>>>,
}

impl ChangeFeed {
    /// Create a feed with the given live buffer and replay backlog sizes.
    pub fn new(capacity: usize, backlog_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(backlog_capacity))),
            backlog_capacity,
            channels: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Publish a committed event. Returns the number of live receivers.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        {
            let mut backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
            if self.backlog_capacity > 0 {
                if backlog.len() == self.backlog_capacity {
                    backlog.pop_front();
                }
                backlog.push_back(event.clone());
            }
        }
        debug!(seq = event.seq, table = %event.table, kind = %event.kind, "change published");
        // No receivers is not an error: nobody is listening yet.
        self.sender.send(event).unwrap_or(0)
    }

    /// Open a named channel.
    ///
    /// Channel names are process-unique: opening a name that is still held
    /// by a live [`FeedReceiver`] fails with [`StateError::ChannelInUse`].
    pub fn open(
        &self,
        channel: &str,
        filter: ChangeFilter,
        resume_after: Option<Seq>,
    ) -> StateResult<FeedReceiver> {
        {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            if !channels.insert(channel.to_string()) {
                return Err(StateError::ChannelInUse(channel.to_string()));
            }
        }
        let guard = ChannelGuard {
            name: channel.to_string(),
            channels: self.channels.clone(),
        };

        // Subscribe before reading the backlog so nothing falls in between;
        // the overlap is dropped by the receiver's sequence check.
        let live = self.sender.subscribe();
        let replay: VecDeque<ChangeEvent> = match resume_after {
            Some(after) => {
                let backlog = self.backlog.lock().unwrap_or_else(|e| e.into_inner());
                backlog
                    .iter()
                    .filter(|e| e.seq > after && filter.matches(e))
                    .cloned()
                    .collect()
            }
            None => VecDeque::new(),
        };

        debug!(%channel, table = %filter.table, replay = replay.len(), "channel opened");
        let mut rx = FeedReceiver::new(channel, filter, live, replay);
        rx.last_seq = resume_after;
        rx.guard = Some(guard);
        Ok(rx)
    }

    /// Names of currently open channels.
    pub fn open_channels(&self) -> Vec<String> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = channels.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Releases a channel name when the receiver holding it is dropped.
struct ChannelGuard {
    name: String,
    channels: Arc<Mutex<HashSet<String>>>,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(&self.name);
        debug!(channel = %self.name, "channel released");
    }
}

/// Receiving side of one open channel.
pub struct FeedReceiver {
    channel: String,
    filter: ChangeFilter,
    live: broadcast::Receiver<ChangeEvent>,
    replay: VecDeque<ChangeEvent>,
    last_seq: Option<Seq>,
    guard: Option<ChannelGuard>,
}

impl FeedReceiver {
    /// Build a receiver over any broadcast source. Used by alternative
    /// transports and test doubles; no channel name is reserved.
    pub fn new(
        channel: &str,
        filter: ChangeFilter,
        live: broadcast::Receiver<ChangeEvent>,
        replay: VecDeque<ChangeEvent>,
    ) -> Self {
        Self {
            channel: channel.to_string(),
            filter,
            live,
            replay,
            last_seq: None,
            guard: None,
        }
    }

    /// Receive the next matching event, replayed events first.
    pub async fn recv(&mut self) -> Result<ChangeEvent, FeedError> {
        while let Some(event) = self.replay.pop_front() {
            if self.accept(&event) {
                return Ok(event);
            }
        }
        loop {
            let event = match self.live.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(FeedError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(FeedError::Closed),
            };
            if self.accept(&event) {
                return Ok(event);
            }
        }
    }

    fn accept(&mut self, event: &ChangeEvent) -> bool {
        if !self.filter.matches(event) {
            return false;
        }
        if self.last_seq.is_some_and(|last| event.seq <= last) {
            return false;
        }
        self.last_seq = Some(event.seq);
        true
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(seq: Seq, table: Table, kind: EventKind) -> ChangeEvent {
        ChangeEvent {
            seq,
            schema: "public".to_string(),
            table,
            kind,
            record: serde_json::json!({ "id": format!("row-{seq}") }),
            old_record: None,
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn filter_matching() {
        let filter = ChangeFilter::inserts("public", Table::EsgMetrics);
        assert!(filter.matches(&event(1, Table::EsgMetrics, EventKind::Insert)));
        assert!(!filter.matches(&event(1, Table::EsgMetrics, EventKind::Update)));
        assert!(!filter.matches(&event(1, Table::RiskZones, EventKind::Insert)));

        let mut other_schema = event(1, Table::EsgMetrics, EventKind::Insert);
        other_schema.schema = "audit".to_string();
        assert!(!filter.matches(&other_schema));

        let any = ChangeFilter {
            event: None,
            ..filter
        };
        assert!(any.matches(&event(1, Table::EsgMetrics, EventKind::Delete)));
    }

    #[tokio::test]
    async fn receives_only_matching_events() {
        let feed = ChangeFeed::new(16, 16);
        let mut rx = feed
            .open("metrics", ChangeFilter::inserts("public", Table::EsgMetrics), None)
            .unwrap();

        feed.publish(event(1, Table::RiskZones, EventKind::Insert));
        feed.publish(event(2, Table::EsgMetrics, EventKind::Update));
        feed.publish(event(3, Table::EsgMetrics, EventKind::Insert));

        assert_eq!(rx.recv().await.unwrap().seq, 3);
    }

    #[test]
    fn channel_names_are_unique_until_dropped() {
        let feed = ChangeFeed::new(16, 16);
        let filter = ChangeFilter::inserts("public", Table::EsgMetrics);

        let rx = feed.open("metrics", filter.clone(), None).unwrap();
        let err = feed.open("metrics", filter.clone(), None).err().unwrap();
        assert!(matches!(err, StateError::ChannelInUse(_)));
        assert_eq!(feed.open_channels(), vec!["metrics".to_string()]);

        drop(rx);
        assert!(feed.open_channels().is_empty());
        assert!(feed.open("metrics", filter, None).is_ok());
    }

    #[tokio::test]
    async fn resume_replays_backlog_after_sequence() {
        let feed = ChangeFeed::new(16, 16);
        for seq in 1..=4 {
            feed.publish(event(seq, Table::EsgMetrics, EventKind::Insert));
        }

        let mut rx = feed
            .open("metrics", ChangeFilter::inserts("public", Table::EsgMetrics), Some(2))
            .unwrap();
        feed.publish(event(5, Table::EsgMetrics, EventKind::Insert));

        let seqs = [
            rx.recv().await.unwrap().seq,
            rx.recv().await.unwrap().seq,
            rx.recv().await.unwrap().seq,
        ];
        assert_eq!(seqs, [3, 4, 5]);
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let feed = ChangeFeed::new(16, 2);
        for seq in 1..=5 {
            feed.publish(event(seq, Table::EsgMetrics, EventKind::Insert));
        }
        let mut rx = feed
            .open("metrics", ChangeFilter::inserts("public", Table::EsgMetrics), Some(0))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().seq, 4);
        assert_eq!(rx.recv().await.unwrap().seq, 5);
    }

    #[tokio::test]
    async fn redelivered_sequence_is_skipped() {
        let (tx, live) = broadcast::channel(8);
        let mut rx = FeedReceiver::new(
            "test",
            ChangeFilter::inserts("public", Table::EsgMetrics),
            live,
            VecDeque::new(),
        );
        tx.send(event(1, Table::EsgMetrics, EventKind::Insert)).unwrap();
        tx.send(event(1, Table::EsgMetrics, EventKind::Insert)).unwrap();
        tx.send(event(2, Table::EsgMetrics, EventKind::Insert)).unwrap();

        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(rx.recv().await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn closed_when_sender_dropped() {
        let (tx, live) = broadcast::channel::<ChangeEvent>(8);
        let mut rx = FeedReceiver::new(
            "test",
            ChangeFilter::inserts("public", Table::EsgMetrics),
            live,
            VecDeque::new(),
        );
        drop(tx);
        assert_eq!(rx.recv().await.unwrap_err(), FeedError::Closed);
    }
}
