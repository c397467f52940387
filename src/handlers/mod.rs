//! Type handlers
//!
//! One handler per family of backend message. Each subscribes to the typed
//! topics the router produces, asks the gate whether the message is live,
//! writes the session's stream record, and emits render requests only for
//! the active session.
//!
//! # Live vs background
//!
//! ```text
//! message ──gate──▶ live?       ──▶ store write + render request
//!               └─▶ background  ──▶ store write only
//! ```
//!
//! The store is written on both paths so a background session can be
//! reconstructed exactly when the user switches to it.
//!
//! Lock discipline: never hold the store lock while emitting. Listeners on
//! the render topic are free to read the store.

mod assistant;
mod session;
mod status;
mod tools;

pub use assistant::AssistantStreamHandler;
pub use session::SessionLifecycleHandler;
pub use status::StatusHandler;
pub use tools::ToolCallHandler;

use crate::bus::{EventBus, ListenerHandle, Payload, Topic, WeakBus};
use crate::collaborators::{ActiveSession, OutboundQueue, ReleaseReason, RenderSurfaces, SurfaceHandle};
use crate::events::{
    AnalyticsEvent, BackendMessage, CallId, MessageKind, PerformanceMetric, RenderRequest,
    SessionId,
};
use crate::gate::{is_active_session_message, resolve_session_id};
use crate::scheduler::{self, SharedScheduler};
use crate::store::{self, SessionStreamStore, SharedStore};
use anyhow::Context;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};

const INSTALL_KEY: &str = "type_handlers";

/// Default delay before a terminal tool call leaves the live map
pub const DEFAULT_TOOL_GRACE: Duration = Duration::from_secs(5);

/// Handler for one or more message kinds
///
/// Handlers are stateless; everything they touch lives in the context.
pub trait TypeHandler: Send + Sync {
    /// Human-readable name for logging and fault reports
    fn name(&self) -> &'static str;

    /// Message kinds this handler subscribes to
    fn kinds(&self) -> &'static [MessageKind];

    fn handle(&self, message: &BackendMessage, ctx: &HandlerContext) -> anyhow::Result<()>;
}

/// Handlers the engine installs by default
pub fn default_handlers() -> Vec<Arc<dyn TypeHandler>> {
    vec![
        Arc::new(AssistantStreamHandler),
        Arc::new(ToolCallHandler),
        Arc::new(StatusHandler),
        Arc::new(SessionLifecycleHandler),
    ]
}

/// Subscribe every handler to its kinds; returns nothing on a second call
pub fn install(
    bus: &EventBus,
    ctx: Arc<HandlerContext>,
    handlers: Vec<Arc<dyn TypeHandler>>,
) -> Vec<ListenerHandle> {
    if !bus.install_once(INSTALL_KEY) {
        tracing::debug!("Type handlers already installed, skipping");
        return Vec::new();
    }

    let mut listeners = Vec::new();
    for handler in handlers {
        for &kind in handler.kinds() {
            let handler = Arc::clone(&handler);
            let ctx = Arc::clone(&ctx);
            listeners.push(bus.on(Topic::Message(kind), move |envelope| {
                let Payload::Message(message) = &envelope.data else {
                    return Ok(());
                };
                handler
                    .handle(message, &ctx)
                    .with_context(|| format!("{} handler failed on {}", handler.name(), kind))
            }));
        }
        tracing::debug!(handler = handler.name(), kinds = ?handler.kinds(), "Handler installed");
    }
    listeners
}

// ─────────────────────────────────────────────────────────────────────────────
// Deferred work
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of a deferred task; at most one pending per key
///
/// Evictions are deduplicated per call. Every queue release is its own
/// signal, so each one carries a fresh number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    EvictTool {
        session_id: SessionId,
        call_id: CallId,
    },
    ReleaseQueue {
        session_id: Option<SessionId>,
        release: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredTask {
    Evict,
    Release(ReleaseReason),
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler context
// ─────────────────────────────────────────────────────────────────────────────

/// Where a message goes and whether it is visible
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub session_id: SessionId,
    pub live: bool,
}

/// Everything a handler may read or write
pub struct HandlerContext {
    bus: WeakBus,
    store: SharedStore,
    tasks: SharedScheduler<TaskKey, DeferredTask>,
    active: Arc<dyn ActiveSession>,
    surfaces: Arc<dyn RenderSurfaces>,
    outbound: Arc<dyn OutboundQueue>,
    next_release: AtomicU64,
    tool_grace: Duration,
}

impl HandlerContext {
    pub fn new(
        bus: &EventBus,
        store: SharedStore,
        active: Arc<dyn ActiveSession>,
        surfaces: Arc<dyn RenderSurfaces>,
        outbound: Arc<dyn OutboundQueue>,
        tool_grace: Duration,
    ) -> Self {
        Self {
            bus: bus.downgrade(),
            store,
            tasks: SharedScheduler::default(),
            active,
            surfaces,
            outbound,
            next_release: AtomicU64::new(0),
            tool_grace,
        }
    }

    pub fn store(&self) -> MutexGuard<'_, SessionStreamStore> {
        store::lock(&self.store)
    }

    pub fn shared_store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn surfaces(&self) -> &dyn RenderSurfaces {
        self.surfaces.as_ref()
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.active.active_session_id()
    }

    /// Resolve a message's session through the gate
    ///
    /// Messages that name no session while none is active are dropped here:
    /// guessing a key would merge unrelated conversations.
    pub fn route(&self, message: &BackendMessage) -> Option<Route> {
        let active = self.active.active_session_id();
        let Some(session_id) = resolve_session_id(message, active.as_ref()) else {
            tracing::warn!(
                kind = %message.kind(),
                "Dropping unroutable message: no session id and no active session"
            );
            self.analytics(
                "unroutable_message",
                None,
                serde_json::json!({ "type": message.kind().type_name() }),
            );
            return None;
        };
        let live = is_active_session_message(message, active.as_ref());
        Some(Route { session_id, live })
    }

    fn emit(&self, topic: Topic, data: Payload) {
        if let Some(bus) = self.bus.upgrade() {
            bus.emit(topic, data);
        }
    }

    pub fn render(&self, request: RenderRequest) {
        self.emit(Topic::Render, Payload::Render(request));
    }

    pub fn analytics(
        &self,
        name: &'static str,
        session_id: Option<&SessionId>,
        properties: serde_json::Value,
    ) {
        self.emit(
            Topic::Analytics,
            Payload::Analytics(AnalyticsEvent {
                name,
                session_id: session_id.cloned(),
                properties,
            }),
        );
    }

    pub fn metric(
        &self,
        name: &'static str,
        value: f64,
        unit: &'static str,
        session_id: Option<&SessionId>,
    ) {
        self.emit(
            Topic::Metric,
            Payload::Metric(PerformanceMetric {
                name,
                value,
                unit,
                session_id: session_id.cloned(),
            }),
        );
    }

    /// Surface to stream into for a live session, opening one if needed
    ///
    /// A freshly opened surface is seeded with the whole buffer, so callers
    /// must only append their delta when `opened` is false.
    pub fn live_surface(&self, session_id: &SessionId) -> (SurfaceHandle, bool) {
        if let Some(handle) = self.surfaces.current(session_id) {
            return (handle, false);
        }
        let text = self.store().get_buffer(session_id).to_string();
        let handle = self.surfaces.open(session_id);
        tracing::debug!(session_id = %session_id, surface = %handle, "Opened live surface");
        self.render(RenderRequest::OpenStream {
            session_id: session_id.clone(),
            surface: handle,
            text,
        });
        (handle, true)
    }

    /// Final render of the session's current text, if there is anything to show
    pub fn finalize_visible(&self, session_id: &SessionId) {
        let text = self.store().get_buffer(session_id).to_string();
        let surface = self.surfaces.current(session_id);
        if surface.is_none() && text.is_empty() {
            return;
        }
        self.render(RenderRequest::FinalizeStream {
            session_id: session_id.clone(),
            surface,
            text,
        });
    }

    /// Broadcast the session's list entry (title and streaming badge)
    pub fn session_list_changed(&self, session_id: &SessionId) {
        let (title, streaming) = {
            let store = self.store();
            let title = store
                .record(session_id)
                .and_then(|r| r.title())
                .map(str::to_string);
            (title, store.is_streaming(session_id))
        };
        self.render(RenderRequest::SessionListChanged {
            session_id: session_id.clone(),
            title,
            streaming,
        });
    }

    fn tasks(&self) -> MutexGuard<'_, scheduler::Scheduler<TaskKey, DeferredTask>> {
        scheduler::lock(&self.tasks)
    }

    /// Remove a terminal call from the live map after the grace delay
    pub fn schedule_eviction(&self, session_id: &SessionId, call_id: &CallId) {
        let key = TaskKey::EvictTool {
            session_id: session_id.clone(),
            call_id: call_id.clone(),
        };
        let due = Instant::now() + self.tool_grace;
        if !self.tasks().schedule(key, due, DeferredTask::Evict) {
            tracing::trace!(session_id = %session_id, call_id = %call_id, "Eviction already pending");
        }
    }

    /// Release the next queued user message on the next tick
    pub fn schedule_release(&self, session_id: Option<&SessionId>, reason: ReleaseReason) {
        let key = TaskKey::ReleaseQueue {
            session_id: session_id.cloned(),
            release: self.next_release.fetch_add(1, Ordering::Relaxed),
        };
        self.tasks()
            .schedule(key, Instant::now(), DeferredTask::Release(reason));
        tracing::trace!(session_id = ?session_id, reason = ?reason, "Queue release scheduled");
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks().len()
    }

    /// Run every deferred task due at `now`; returns how many ran
    pub fn run_deferred(&self, now: Instant) -> usize {
        let due = self.tasks().take_due(now);
        let count = due.len();
        for (key, task) in due {
            match (key, task) {
                (
                    TaskKey::EvictTool {
                        session_id,
                        call_id,
                    },
                    _,
                ) => {
                    self.store().evict_tool(&session_id, &call_id);
                }
                (TaskKey::ReleaseQueue { session_id, .. }, DeferredTask::Release(reason)) => {
                    self.outbound.release_next(session_id.as_ref(), reason);
                }
                (TaskKey::ReleaseQueue { session_id, .. }, DeferredTask::Evict) => {
                    tracing::warn!(session_id = ?session_id, "Release task carried no reason");
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests;
