//! Keyed deferred tasks
//!
//! Follow-up work (tool-call eviction, releasing the outbound queue) is not
//! run inside the dispatch that triggered it. It is parked here and run by
//! the engine's `tick` on a later turn of the event loop.
//!
//! A key can be pending at most once: scheduling an already-pending key is
//! a no-op, so repeated terminal events never stack duplicate timers.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug)]
struct Pending<V> {
    due: Instant,
    /// Insertion counter, breaks ties between equal due times
    seq: u64,
    value: V,
}

#[derive(Debug)]
pub struct Scheduler<K, V> {
    pending: HashMap<K, Pending<V>>,
    next_seq: u64,
}

impl<K, V> Default for Scheduler<K, V> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K: Eq + Hash + Clone, V> Scheduler<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `value` under `key` until `due`
    ///
    /// Returns false, leaving the existing task untouched, when `key` is
    /// already pending.
    pub fn schedule(&mut self, key: K, due: Instant, value: V) -> bool {
        if self.pending.contains_key(&key) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(key, Pending { due, seq, value });
        true
    }

    /// Drop a pending task; cancelling an unknown key is a no-op
    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// Remove and return every task due at or before `now`, earliest first
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, V)> {
        let due_keys: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(k, _)| k.clone())
            .collect();

        let mut due: Vec<(Instant, u64, K, V)> = due_keys
            .into_iter()
            .filter_map(|key| {
                self.pending
                    .remove(&key)
                    .map(|p| (p.due, p.seq, key, p.value))
            })
            .collect();
        due.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        due.into_iter().map(|(_, _, k, v)| (k, v)).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Scheduler shared between handlers and the engine
pub type SharedScheduler<K, V> = Arc<Mutex<Scheduler<K, V>>>;

pub fn lock<K, V>(scheduler: &SharedScheduler<K, V>) -> MutexGuard<'_, Scheduler<K, V>> {
    scheduler
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
