// Rolling event log
//
// Keeps the last N emissions for debugging. Purely diagnostic: nothing in
// dispatch reads it back.

use super::envelope::Envelope;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default number of events retained
pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// One remembered emission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub topic: &'static str,
    pub source: &'static str,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

/// Bounded ring of recent events (oldest dropped first)
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    entries: Mutex<VecDeque<EventRecord>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, envelope: &Envelope) {
        if self.capacity == 0 {
            return;
        }
        let record = EventRecord {
            sequence: envelope.meta.sequence,
            topic: envelope.topic.name(),
            source: envelope.meta.source,
            timestamp: envelope.meta.timestamp,
            summary: envelope.data.summary(),
        };

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Snapshot, most recent last
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
