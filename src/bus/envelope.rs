//! Envelope every bus emission is wrapped in
//!
//! Listeners always receive `Envelope { topic, data, meta }`; the payload
//! shape is fixed by the `Payload` enum, never guessed.

use crate::events::{
    AnalyticsEvent, BackendMessage, MessageKind, PerformanceMetric, ReconstructRequest,
    RenderRequest,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Event names, as a closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Raw messages from the transport bridge
    Inbound,
    /// Typed fan-out produced by the router
    Message(MessageKind),
    StreamReconstruct,
    Render,
    Analytics,
    Metric,
    /// A listener failed while handling another event
    BusError,
}

impl Topic {
    pub fn name(self) -> &'static str {
        match self {
            Self::Inbound => "backend:message",
            Self::Message(kind) => kind.event_name(),
            Self::StreamReconstruct => "stream:reconstruct",
            Self::Render => "render:request",
            Self::Analytics => "analytics:event",
            Self::Metric => "performance:metric",
            Self::BusError => "error:bus",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Report of a listener that returned an error or panicked
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenerFault {
    /// Topic that was being dispatched
    pub topic: &'static str,
    pub listener: ListenerId,
    pub message: String,
    pub panicked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Inbound(serde_json::Value),
    Message(BackendMessage),
    Reconstruct(ReconstructRequest),
    Render(RenderRequest),
    Analytics(AnalyticsEvent),
    Metric(PerformanceMetric),
    Fault(ListenerFault),
}

impl Payload {
    /// One-line description for the rolling event log
    pub fn summary(&self) -> String {
        match self {
            Self::Inbound(value) => {
                let type_name = value.get("type").and_then(|t| t.as_str()).unwrap_or("?");
                format!("inbound type={type_name}")
            }
            Self::Message(msg) => match msg.session_id() {
                Some(id) => format!("{} session={id}", msg.kind()),
                None => format!("{} session=-", msg.kind()),
            },
            Self::Reconstruct(req) => match &req.session_id {
                Some(id) => format!("reconstruct session={id}"),
                None => "reconstruct session=-".to_string(),
            },
            Self::Render(req) => {
                let op = match req {
                    RenderRequest::OpenStream { .. } => "open_stream",
                    RenderRequest::AppendStream { .. } => "append_stream",
                    RenderRequest::FinalizeStream { .. } => "finalize_stream",
                    RenderRequest::ToolCard { .. } => "tool_card",
                    RenderRequest::Notice { .. } => "notice",
                    RenderRequest::SessionListChanged { .. } => "session_list_changed",
                };
                format!("render {op} session={}", req.session_id())
            }
            Self::Analytics(event) => format!("analytics {}", event.name),
            Self::Metric(metric) => format!("metric {}={}{}", metric.name, metric.value, metric.unit),
            Self::Fault(fault) => format!("fault {} on {}", fault.listener, fault.topic),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventMeta {
    /// Component that emitted the event ("transport", "router", ...)
    pub source: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Bus-wide emission counter
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub topic: Topic,
    pub data: Payload,
    pub meta: EventMeta,
}
