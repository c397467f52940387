//! Active-session gate
//!
//! The one place that decides what a message without a session id means.
//! Handlers must go through these two functions instead of comparing ids
//! themselves.

use crate::events::{BackendMessage, ReconstructRequest, SessionId};

/// Anything that may name the session it belongs to
pub trait SessionScoped {
    fn scoped_session_id(&self) -> Option<&SessionId>;
}

impl SessionScoped for BackendMessage {
    fn scoped_session_id(&self) -> Option<&SessionId> {
        self.session_id()
    }
}

impl SessionScoped for ReconstructRequest {
    fn scoped_session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }
}

/// Should this message touch the visible UI?
///
/// With no active session nothing is live, including messages without a
/// session id: during startup or mid-switch an early message must not be
/// applied to whichever session becomes active a moment later.
pub fn is_active_session_message<M: SessionScoped + ?Sized>(
    message: &M,
    current_active_id: Option<&SessionId>,
) -> bool {
    let Some(active) = current_active_id else {
        return false;
    };
    match message.scoped_session_id() {
        // Single-session message shapes belong to the active session
        None => true,
        Some(id) => id == active,
    }
}

/// Session a message should be buffered under
///
/// Returns `None` when the message names no session and none is active.
/// Callers must drop such messages rather than invent a key.
pub fn resolve_session_id<M: SessionScoped + ?Sized>(
    message: &M,
    current_active_id: Option<&SessionId>,
) -> Option<SessionId> {
    message
        .scoped_session_id()
        .or(current_active_id)
        .cloned()
}
