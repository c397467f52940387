//! Interfaces to the collaborators around the core
//!
//! The core reads the active session id, asks the UI for streaming
//! surfaces, and tells the outbound queue when to release the next user
//! message. Each concern is a trait so the UI layer can plug in its own
//! implementation; the in-memory versions here back the replay driver and
//! the tests.

use crate::events::SessionId;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

// ─────────────────────────────────────────────────────────────────────────────
// Active session
// ─────────────────────────────────────────────────────────────────────────────

/// Read access to the UI's notion of the visible session
pub trait ActiveSession: Send + Sync {
    fn active_session_id(&self) -> Option<SessionId>;
}

/// Active session id held in memory, written by whoever owns the UI state
#[derive(Debug, Default)]
pub struct ActiveSessionCell {
    current: RwLock<Option<SessionId>>,
}

impl ActiveSessionCell {
    pub fn new(initial: Option<SessionId>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn set(&self, session_id: Option<SessionId>) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = session_id;
    }
}

impl ActiveSession for ActiveSessionCell {
    fn active_session_id(&self) -> Option<SessionId> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Render surfaces
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a live streaming surface created by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SurfaceHandle(pub u64);

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Creation and lookup of streaming surfaces
///
/// A surface stays current after its turn is finalized, until the UI tears
/// the view down. `current` is the existing-surface check reconstruction
/// relies on to avoid rendering the same session twice.
pub trait RenderSurfaces: Send + Sync {
    /// Create a fresh surface for `session_id`, replacing any previous one
    fn open(&self, session_id: &SessionId) -> SurfaceHandle;

    fn current(&self, session_id: &SessionId) -> Option<SurfaceHandle>;

    /// Forget the session's surface when its view is torn down
    fn close(&self, session_id: &SessionId);
}

/// In-memory surface bookkeeping
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    next: AtomicU64,
    open: Mutex<HashMap<SessionId, SurfaceHandle>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every surface, as the UI does when it rebuilds the chat view
    pub fn clear(&self) {
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Total surfaces ever opened
    pub fn opened(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl RenderSurfaces for SurfaceRegistry {
    fn open(&self, session_id: &SessionId) -> SurfaceHandle {
        let handle = SurfaceHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session_id.clone(), handle);
        handle
    }

    fn current(&self, session_id: &SessionId) -> Option<SurfaceHandle> {
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .copied()
    }

    fn close(&self, session_id: &SessionId) {
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound queue
// ─────────────────────────────────────────────────────────────────────────────

/// Why the outbound queue is being released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    TurnEnded,
    /// Released anyway so one failed turn cannot block later input
    Error,
    Interrupted,
}

/// Queue of user messages waiting for the current turn to finish
pub trait OutboundQueue: Send + Sync {
    fn release_next(&self, session_id: Option<&SessionId>, reason: ReleaseReason);
}

/// Queue stand-in that only records release signals
#[derive(Debug, Default)]
pub struct ReleaseLog {
    releases: Mutex<Vec<(Option<SessionId>, ReleaseReason)>>,
}

impl ReleaseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn releases(&self) -> Vec<(Option<SessionId>, ReleaseReason)> {
        self.releases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl OutboundQueue for ReleaseLog {
    fn release_next(&self, session_id: Option<&SessionId>, reason: ReleaseReason) {
        tracing::debug!(session_id = ?session_id, reason = ?reason, "Outbound queue released");
        self.releases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((session_id.cloned(), reason));
    }
}
