//! Bounded, append-ordered buffers for live table views.
//!
//! Records are kept in receipt order. A buffer holds at most `capacity`
//! records and, when a window is set, drops records whose timestamp is
//! older than the newest timestamp seen minus the window.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use guardian_state::{MetricRecord, RiskZone};

/// Records carrying an observation time.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for MetricRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for RiskZone {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug, Clone)]
pub struct MetricBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
    window: Option<chrono::Duration>,
    newest: Option<DateTime<Utc>>,
    evicted: u64,
}

impl<T: Timestamped + Clone> MetricBuffer<T> {
    pub fn new(capacity: usize, window: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            window: window.and_then(|w| chrono::Duration::from_std(w).ok()),
            newest: None,
            evicted: 0,
        }
    }

    /// Append one record at the tail, evicting from the head as needed.
    ///
    /// Returns the records dropped by this append, which may include the
    /// appended record itself when it is already older than the window.
    pub fn append(&mut self, record: T) -> Vec<T> {
        let ts = record.timestamp();
        if self.newest.is_none_or(|newest| ts > newest) {
            self.newest = Some(ts);
        }
        self.entries.push_back(record);

        let mut dropped = Vec::new();
        // A window reaching past the earliest representable time keeps everything.
        if let Some(cutoff) = self
            .window
            .zip(self.newest)
            .and_then(|(window, newest)| newest.checked_sub_signed(window))
        {
            let (kept, stale): (VecDeque<T>, VecDeque<T>) = std::mem::take(&mut self.entries)
                .into_iter()
                .partition(|r| r.timestamp() >= cutoff);
            self.entries = kept;
            dropped.extend(stale);
        }

        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                dropped.push(oldest);
            }
        }

        self.evicted += dropped.len() as u64;
        dropped
    }

    /// All held records, oldest received first.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records dropped by the count or age bound since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.newest = None;
    }
}
