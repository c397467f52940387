//! Engine: the composition root
//!
//! Owns the bus and the session store, installs the router, the type
//! handlers and reconstruction, and exposes the three inputs the outside
//! world drives it with:
//!
//! - `deliver`: one raw backend message from the transport
//! - `request_reconstruct`: the UI switched sessions
//! - `tick`: run deferred work that is due (evictions, queue releases)
//!
//! Everything is synchronous. A host runtime only has to call `tick`
//! periodically; the binary does so from a tokio interval.

use crate::bus::{EventBus, ListenerHandle, Payload, Topic, DEFAULT_LOG_CAPACITY};
use crate::collaborators::{
    ActiveSession, ActiveSessionCell, OutboundQueue, ReleaseLog, RenderSurfaces, SurfaceRegistry,
};
use crate::config::Config;
use crate::events::{MessageKind, ReconstructRequest, SessionId};
use crate::handlers::{self, HandlerContext, DEFAULT_TOOL_GRACE};
use crate::reconstruct::ReconstructionHandler;
use crate::router;
use crate::store::{self, SessionStreamStore, SharedStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tunables the engine is built with
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub bus_log_capacity: usize,
    /// How long a finished tool call stays in the live map
    pub tool_grace: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            bus_log_capacity: DEFAULT_LOG_CAPACITY,
            tool_grace: DEFAULT_TOOL_GRACE,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            bus_log_capacity: config.bus.log_capacity,
            tool_grace: config.store.tool_grace,
        }
    }
}

/// The external collaborators the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub active: Arc<dyn ActiveSession>,
    pub surfaces: Arc<dyn RenderSurfaces>,
    pub outbound: Arc<dyn OutboundQueue>,
}

impl Collaborators {
    /// In-memory collaborators with no active session
    pub fn in_memory() -> Self {
        Self {
            active: Arc::new(ActiveSessionCell::new(None)),
            surfaces: Arc::new(SurfaceRegistry::new()),
            outbound: Arc::new(ReleaseLog::new()),
        }
    }
}

/// Point-in-time view of the engine for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub active_session: Option<SessionId>,
    pub sessions: usize,
    pub streaming_sessions: Vec<SessionId>,
    pub pending_tasks: usize,
    /// Exact-topic listener counts, topics with none omitted
    pub listeners: BTreeMap<&'static str, usize>,
    pub wildcard_listeners: usize,
    pub logged_events: usize,
}

pub struct Engine {
    bus: EventBus,
    store: SharedStore,
    ctx: Arc<HandlerContext>,
    reconstruction: Arc<ReconstructionHandler>,
    listeners: Vec<ListenerHandle>,
}

impl Engine {
    pub fn new(options: EngineOptions, collaborators: Collaborators) -> Self {
        let bus = EventBus::new(options.bus_log_capacity);
        let store = SessionStreamStore::shared();
        let ctx = Arc::new(HandlerContext::new(
            &bus,
            Arc::clone(&store),
            collaborators.active,
            collaborators.surfaces,
            collaborators.outbound,
            options.tool_grace,
        ));

        let mut listeners = Vec::new();
        listeners.extend(router::register_type_routing(&bus));
        listeners.extend(handlers::install(
            &bus,
            Arc::clone(&ctx),
            handlers::default_handlers(),
        ));
        let reconstruction = Arc::new(ReconstructionHandler::new(Arc::clone(&ctx)));
        listeners.extend(reconstruction.install(&bus));
        listeners.push(report_faults(&bus, Arc::clone(&ctx)));

        tracing::info!(
            listeners = listeners.len(),
            log_capacity = options.bus_log_capacity,
            tool_grace_ms = options.tool_grace.as_millis() as u64,
            "Engine ready"
        );

        Self {
            bus,
            store,
            ctx,
            reconstruction,
            listeners,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn reconstruction(&self) -> &Arc<ReconstructionHandler> {
        &self.reconstruction
    }

    /// Feed one raw backend message in; returns its bus sequence number
    pub fn deliver(&self, message: serde_json::Value) -> u64 {
        self.bus
            .emit_from("transport", Topic::Inbound, Payload::Inbound(message))
    }

    pub fn request_reconstruct(&self, request: ReconstructRequest) -> u64 {
        self.bus.emit_from(
            "ui",
            Topic::StreamReconstruct,
            Payload::Reconstruct(request),
        )
    }

    /// Run deferred tasks due at `now`; returns how many ran
    pub fn tick(&self, now: Instant) -> usize {
        let ran = self.ctx.run_deferred(now);
        if ran > 0 {
            tracing::trace!(ran, "Deferred tasks ran");
        }
        ran
    }

    pub fn health(&self) -> HealthReport {
        let (sessions, streaming_sessions) = {
            let store = store::lock(&self.store);
            (store.len(), store.streaming_sessions())
        };

        let topics = [Topic::Inbound, Topic::StreamReconstruct, Topic::Render]
            .into_iter()
            .chain(MessageKind::ALL.into_iter().map(Topic::Message))
            .chain([Topic::Analytics, Topic::Metric, Topic::BusError]);
        let listeners = topics
            .filter_map(|topic| {
                let count = self.bus.listener_count(topic);
                (count > 0).then_some((topic.name(), count))
            })
            .collect();

        HealthReport {
            active_session: self.ctx.active_session_id(),
            sessions,
            streaming_sessions,
            pending_tasks: self.ctx.pending_tasks(),
            listeners,
            wildcard_listeners: self.bus.wildcard_count(),
            logged_events: self.bus.log_len(),
        }
    }

    /// Detach every listener the engine installed
    pub fn shutdown(&self) {
        let removed = self.listeners.iter().filter(|l| l.unsubscribe()).count();
        tracing::info!(removed, "Engine listeners detached");
    }
}

/// Forward listener faults to analytics
///
/// Faults raised by analytics listeners themselves are only logged, or a
/// failing sink would feed itself forever.
fn report_faults(bus: &EventBus, ctx: Arc<HandlerContext>) -> ListenerHandle {
    bus.on(Topic::BusError, move |envelope| {
        if let Payload::Fault(fault) = &envelope.data {
            if fault.topic != Topic::Analytics.name() {
                ctx.analytics(
                    "listener_fault",
                    None,
                    serde_json::json!({
                        "topic": fault.topic,
                        "listener": fault.listener,
                        "panicked": fault.panicked,
                        "message": fault.message,
                    }),
                );
            }
        }
        Ok(())
    })
}
