//! Session Stream Store
//!
//! Per-session streaming state: the text buffer of the current turn, the
//! streaming flag, and the ordered map of tool calls seen in that session.
//! Nothing here knows about the UI; handlers decide what to render.
//!
//! Every operation is total. Writes create the record on first use and
//! reads of an absent session return empty state, because a session can
//! receive its first event at any time without prior registration.

mod tool_call;

pub use tool_call::{
    arguments_look_complete, RejectReason, ToolCall, ToolOutcome, ToolStatus, ToolTransition,
    ToolUpdate,
};

use crate::events::{CallId, Notice, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Store shared between handlers, reconstruction and the engine
pub type SharedStore = Arc<Mutex<SessionStreamStore>>;

/// Lock a shared store, recovering the data if a previous holder panicked
pub fn lock(store: &SharedStore) -> MutexGuard<'_, SessionStreamStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool events (insertion-ordered map)
// ─────────────────────────────────────────────────────────────────────────────

/// Tool calls of one session in first-seen order
#[derive(Debug, Clone, Default)]
pub struct ToolEvents {
    order: Vec<CallId>,
    entries: HashMap<CallId, ToolCall>,
    /// Ids evicted during the current turn; late updates for them are refused
    evicted: HashSet<CallId>,
}

impl ToolEvents {
    pub fn get(&self, call_id: &CallId) -> Option<&ToolCall> {
        self.entries.get(call_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CallId, &ToolCall)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|call| (id, call)))
    }

    fn apply(&mut self, call_id: &CallId, update: ToolUpdate) -> ToolTransition {
        if self.evicted.contains(call_id) {
            return ToolTransition::Rejected(RejectReason::Evicted);
        }
        match self.entries.get_mut(call_id) {
            Some(call) => call.apply(update),
            None => {
                let call = ToolCall::create(update);
                let status = call.status;
                self.order.push(call_id.clone());
                self.entries.insert(call_id.clone(), call);
                ToolTransition::Created(status)
            }
        }
    }

    fn evict(&mut self, call_id: &CallId) -> Option<ToolCall> {
        let removed = self.entries.remove(call_id)?;
        self.order.retain(|id| id != call_id);
        self.evicted.insert(call_id.clone());
        Some(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session record
// ─────────────────────────────────────────────────────────────────────────────

/// Streaming state of one session
#[derive(Debug, Clone)]
pub struct SessionStreamRecord {
    pub session_id: SessionId,
    text_buffer: String,
    is_streaming: bool,
    tool_events: ToolEvents,
    /// Number of turns started in this session
    turn: u64,
    turn_started_at: Option<Instant>,
    /// Bumped on every write; lets readers detect "nothing changed"
    revision: u64,
    /// Notice that arrived while the session was in the background
    pending_notice: Option<Notice>,
    title: Option<String>,
}

impl SessionStreamRecord {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            text_buffer: String::new(),
            is_streaming: false,
            tool_events: ToolEvents::default(),
            turn: 0,
            turn_started_at: None,
            revision: 0,
            pending_notice: None,
            title: None,
        }
    }

    pub fn text_buffer(&self) -> &str {
        &self.text_buffer
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn tool_events(&self) -> &ToolEvents {
        &self.tool_events
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn turn_started_at(&self) -> Option<Instant> {
        self.turn_started_at
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// All session records plus the call-id ownership index
#[derive(Debug, Default)]
pub struct SessionStreamStore {
    records: HashMap<SessionId, SessionStreamRecord>,
    /// Every call id belongs to exactly one session
    call_owners: HashMap<CallId, SessionId>,
}

impl SessionStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Mutex::new(Self::new()))
    }

    fn record_mut(&mut self, session_id: &SessionId) -> &mut SessionStreamRecord {
        self.records
            .entry(session_id.clone())
            .or_insert_with(|| {
                tracing::trace!(session_id = %session_id, "Creating stream record");
                SessionStreamRecord::new(session_id.clone())
            })
    }

    /// Ensure a record exists without otherwise changing it
    pub fn ensure(&mut self, session_id: &SessionId) {
        self.record_mut(session_id);
    }

    pub fn record(&self, session_id: &SessionId) -> Option<&SessionStreamRecord> {
        self.records.get(session_id)
    }

    /// Mark a turn as begun; the buffer is left untouched
    pub fn start_stream(&mut self, session_id: &SessionId) {
        let record = self.record_mut(session_id);
        record.is_streaming = true;
        record.touch();
    }

    /// Start a new assistant turn: clear the buffer once and start streaming
    ///
    /// Returns the new turn number.
    pub fn begin_turn(&mut self, session_id: &SessionId, now: Instant) -> u64 {
        let record = self.records.entry(session_id.clone()).or_insert_with(|| {
            tracing::trace!(session_id = %session_id, "Creating stream record");
            SessionStreamRecord::new(session_id.clone())
        });
        // Evicted ids may be reused by the backend once a new turn starts
        for call_id in record.tool_events.evicted.drain() {
            self.call_owners.remove(&call_id);
        }
        record.text_buffer.clear();
        record.is_streaming = true;
        record.turn += 1;
        record.turn_started_at = Some(now);
        record.touch();
        record.turn
    }

    pub fn append_to_buffer(&mut self, session_id: &SessionId, delta: &str) {
        if delta.is_empty() {
            // Still vivify: the session has now been seen
            self.record_mut(session_id);
            return;
        }
        let record = self.record_mut(session_id);
        record.text_buffer.push_str(delta);
        record.touch();
    }

    /// Clear the streaming flag; returns whether the session was streaming
    pub fn end_stream(&mut self, session_id: &SessionId) -> bool {
        let record = self.record_mut(session_id);
        let was_streaming = record.is_streaming;
        if was_streaming {
            record.is_streaming = false;
            record.touch();
        }
        was_streaming
    }

    pub fn get_buffer(&self, session_id: &SessionId) -> &str {
        self.records
            .get(session_id)
            .map(|r| r.text_buffer.as_str())
            .unwrap_or("")
    }

    pub fn is_streaming(&self, session_id: &SessionId) -> bool {
        self.records
            .get(session_id)
            .map(|r| r.is_streaming)
            .unwrap_or(false)
    }

    /// Sessions currently streaming, for list badges
    pub fn streaming_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .records
            .values()
            .filter(|r| r.is_streaming)
            .map(|r| r.session_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn revision(&self, session_id: &SessionId) -> u64 {
        self.records.get(session_id).map(|r| r.revision).unwrap_or(0)
    }

    /// Apply a tool-call update for a session
    pub fn buffer_tool_event(
        &mut self,
        session_id: &SessionId,
        call_id: &CallId,
        update: ToolUpdate,
    ) -> ToolTransition {
        match self.call_owners.get(call_id) {
            Some(owner) if owner != session_id => {
                tracing::warn!(
                    session_id = %session_id,
                    owner = %owner,
                    call_id = %call_id,
                    "Tool call id already belongs to another session"
                );
                return ToolTransition::Rejected(RejectReason::ForeignSession);
            }
            Some(_) => {}
            None => {
                self.call_owners.insert(call_id.clone(), session_id.clone());
            }
        }

        let record = self.record_mut(session_id);
        let transition = record.tool_events.apply(call_id, update);
        if transition.status().is_some() {
            record.touch();
        }
        transition
    }

    pub fn tool(&self, session_id: &SessionId, call_id: &CallId) -> Option<&ToolCall> {
        self.records.get(session_id)?.tool_events.get(call_id)
    }

    /// Move every non-terminal call of a session to `Interrupted`
    ///
    /// Returns the calls that changed, in first-seen order.
    pub fn interrupt_tools(&mut self, session_id: &SessionId) -> Vec<(CallId, ToolCall)> {
        let Some(record) = self.records.get_mut(session_id) else {
            return Vec::new();
        };

        let pending: Vec<CallId> = record
            .tool_events
            .iter()
            .filter(|(_, call)| !call.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        let mut changed = Vec::with_capacity(pending.len());
        for call_id in pending {
            let transition = record
                .tool_events
                .apply(&call_id, ToolUpdate::End(ToolOutcome::Interrupted));
            if transition.became_terminal() {
                if let Some(call) = record.tool_events.get(&call_id) {
                    changed.push((call_id, call.clone()));
                }
            }
        }
        if !changed.is_empty() {
            record.touch();
        }
        changed
    }

    /// Drop a terminal call from the live map
    ///
    /// Non-terminal calls are kept; returns whether anything was removed.
    pub fn evict_tool(&mut self, session_id: &SessionId, call_id: &CallId) -> bool {
        let Some(record) = self.records.get_mut(session_id) else {
            return false;
        };
        match record.tool_events.get(call_id) {
            Some(call) if call.status.is_terminal() => {}
            _ => return false,
        }
        record.tool_events.evict(call_id);
        tracing::trace!(session_id = %session_id, call_id = %call_id, "Evicted tool call");
        true
    }

    pub fn set_pending_notice(&mut self, session_id: &SessionId, notice: Notice) {
        let record = self.record_mut(session_id);
        record.pending_notice = Some(notice);
        record.touch();
    }

    /// Take the background notice, if any; it is shown at most once
    pub fn take_pending_notice(&mut self, session_id: &SessionId) -> Option<Notice> {
        self.records.get_mut(session_id)?.pending_notice.take()
    }

    pub fn set_title(&mut self, session_id: &SessionId, title: Option<String>) {
        let record = self.record_mut(session_id);
        if title.is_some() {
            record.title = title;
        }
    }

    /// Remove a session entirely
    ///
    /// Retention is an external policy; the core itself never calls this.
    pub fn remove_session(&mut self, session_id: &SessionId) -> Option<SessionStreamRecord> {
        let record = self.records.remove(session_id)?;
        self.call_owners.retain(|_, owner| owner != session_id);
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
