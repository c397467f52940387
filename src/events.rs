// Backend messages and the derived events the core emits in response
//
// Messages arrive from the transport bridge as already-decoded JSON values.
// `BackendMessage` is the typed view of those values; `MessageKind` is the
// closed set of `type` strings the core understands, with an explicit
// mapping from each kind to its internal event name.
//
// The second half of this file holds the derived payloads (render requests,
// analytics, metrics, reconstruction requests) that handlers put back on the
// bus for external collaborators.

use crate::collaborators::SurfaceHandle;
use crate::store::{ToolCall, ToolStatus};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque chat session identifier
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Backend-assigned tool call identifier
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Every backend message type the core routes
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum MessageKind {
    AssistantStart,
    AssistantDelta,
    AssistantEnd,
    FunctionDetected,
    FunctionArgumentsDelta,
    FunctionArgumentsDone,
    FunctionExecuting,
    FunctionCompleted,
    Interrupted,
    Error,
    RateLimit,
    SessionCreated,
    SessionTitle,
    /// Any `type` string not listed above
    Unknown,
}

impl MessageKind {
    pub const ALL: [MessageKind; 14] = [
        MessageKind::AssistantStart,
        MessageKind::AssistantDelta,
        MessageKind::AssistantEnd,
        MessageKind::FunctionDetected,
        MessageKind::FunctionArgumentsDelta,
        MessageKind::FunctionArgumentsDone,
        MessageKind::FunctionExecuting,
        MessageKind::FunctionCompleted,
        MessageKind::Interrupted,
        MessageKind::Error,
        MessageKind::RateLimit,
        MessageKind::SessionCreated,
        MessageKind::SessionTitle,
        MessageKind::Unknown,
    ];

    /// Wire `type` string for this kind
    pub fn type_name(self) -> &'static str {
        match self {
            Self::AssistantStart => "assistant_start",
            Self::AssistantDelta => "assistant_delta",
            Self::AssistantEnd => "assistant_end",
            Self::FunctionDetected => "function_detected",
            Self::FunctionArgumentsDelta => "function_arguments_delta",
            Self::FunctionArgumentsDone => "function_arguments_done",
            Self::FunctionExecuting => "function_executing",
            Self::FunctionCompleted => "function_completed",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
            Self::RateLimit => "rate_limit",
            Self::SessionCreated => "session_created",
            Self::SessionTitle => "session_title",
            Self::Unknown => "unknown",
        }
    }

    /// Internal event name the router fans this kind out under
    pub fn event_name(self) -> &'static str {
        match self {
            Self::AssistantStart => "message:assistant_start",
            Self::AssistantDelta => "message:assistant_delta",
            Self::AssistantEnd => "message:assistant_end",
            Self::FunctionDetected => "message:function_detected",
            Self::FunctionArgumentsDelta => "message:function_arguments_delta",
            Self::FunctionArgumentsDone => "message:function_arguments_done",
            Self::FunctionExecuting => "message:function_executing",
            Self::FunctionCompleted => "message:function_completed",
            Self::Interrupted => "message:interrupted",
            Self::Error => "message:error",
            Self::RateLimit => "message:rate_limit",
            Self::SessionCreated => "message:session_created",
            Self::SessionTitle => "message:session_title",
            Self::Unknown => "message:unknown",
        }
    }

    pub fn from_type_name(name: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| *kind != Self::Unknown && kind.type_name() == name)
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend messages
// ─────────────────────────────────────────────────────────────────────────────

/// Failure to turn a transport value into a `BackendMessage`
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message has no string `type` field")]
    MissingType,
    #[error("malformed `{type_name}` message: {source}")]
    Malformed {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Typed view of one inbound backend message
///
/// `session_id` is optional on every variant: older single-session message
/// shapes omit it and the gate resolves them against the active session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendMessage {
    AssistantStart {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        #[serde(default)]
        message_id: Option<String>,
    },
    AssistantDelta {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        content: String,
    },
    AssistantEnd {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        #[serde(default)]
        finish_reason: Option<String>,
    },
    FunctionDetected {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        tool_call_id: CallId,
        tool_name: String,
        #[serde(default, deserialize_with = "arguments_text")]
        tool_arguments: Option<String>,
    },
    FunctionArgumentsDelta {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        tool_call_id: CallId,
        delta: String,
    },
    FunctionArgumentsDone {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        tool_call_id: CallId,
        #[serde(default, deserialize_with = "arguments_text")]
        tool_arguments: Option<String>,
    },
    FunctionExecuting {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        tool_call_id: CallId,
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default, deserialize_with = "arguments_text")]
        tool_arguments: Option<String>,
    },
    FunctionCompleted {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        tool_call_id: CallId,
        #[serde(default)]
        tool_name: Option<String>,
        tool_success: bool,
        #[serde(default)]
        tool_result: Option<serde_json::Value>,
        #[serde(default)]
        tool_error: Option<String>,
        /// Set by the backend when the failure was a user cancellation
        #[serde(default)]
        interrupted: bool,
    },
    Interrupted {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        #[serde(default)]
        reason: Option<String>,
    },
    Error {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
    RateLimit {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        #[serde(default)]
        retry_after_secs: Option<u64>,
        #[serde(default)]
        message: Option<String>,
    },
    SessionCreated {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        #[serde(default)]
        title: Option<String>,
    },
    SessionTitle {
        #[serde(default, deserialize_with = "session_id_opt")]
        session_id: Option<SessionId>,
        title: String,
    },
    /// A `type` this core has no handler for; routed but otherwise ignored
    #[serde(skip)]
    Unknown {
        type_name: String,
        session_id: Option<SessionId>,
    },
}

impl BackendMessage {
    /// Decode a transport value, falling back to `Unknown` for unrecognised types
    pub fn decode(value: &serde_json::Value) -> Result<Self, DecodeError> {
        let type_name = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(DecodeError::MissingType)?;

        if MessageKind::from_type_name(type_name) == MessageKind::Unknown {
            let session_id = value
                .get("session_id")
                .and_then(|s| s.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(SessionId::from);
            return Ok(Self::Unknown {
                type_name: type_name.to_string(),
                session_id,
            });
        }

        serde_json::from_value(value.clone()).map_err(|source| DecodeError::Malformed {
            type_name: type_name.to_string(),
            source,
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::AssistantStart { .. } => MessageKind::AssistantStart,
            Self::AssistantDelta { .. } => MessageKind::AssistantDelta,
            Self::AssistantEnd { .. } => MessageKind::AssistantEnd,
            Self::FunctionDetected { .. } => MessageKind::FunctionDetected,
            Self::FunctionArgumentsDelta { .. } => MessageKind::FunctionArgumentsDelta,
            Self::FunctionArgumentsDone { .. } => MessageKind::FunctionArgumentsDone,
            Self::FunctionExecuting { .. } => MessageKind::FunctionExecuting,
            Self::FunctionCompleted { .. } => MessageKind::FunctionCompleted,
            Self::Interrupted { .. } => MessageKind::Interrupted,
            Self::Error { .. } => MessageKind::Error,
            Self::RateLimit { .. } => MessageKind::RateLimit,
            Self::SessionCreated { .. } => MessageKind::SessionCreated,
            Self::SessionTitle { .. } => MessageKind::SessionTitle,
            Self::Unknown { .. } => MessageKind::Unknown,
        }
    }

    /// The session this message names, if it names one
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::AssistantStart { session_id, .. }
            | Self::AssistantDelta { session_id, .. }
            | Self::AssistantEnd { session_id, .. }
            | Self::FunctionDetected { session_id, .. }
            | Self::FunctionArgumentsDelta { session_id, .. }
            | Self::FunctionArgumentsDone { session_id, .. }
            | Self::FunctionExecuting { session_id, .. }
            | Self::FunctionCompleted { session_id, .. }
            | Self::Interrupted { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::RateLimit { session_id, .. }
            | Self::SessionCreated { session_id, .. }
            | Self::SessionTitle { session_id, .. }
            | Self::Unknown { session_id, .. } => session_id.as_ref(),
        }
    }
}

/// Empty or whitespace-only ids count as absent
fn session_id_opt<'de, D>(deserializer: D) -> Result<Option<SessionId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()).map(SessionId::from))
}

/// Arguments arrive either as JSON text or as an already-parsed object
fn arguments_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Derived events
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of a tool call as the UI should draw it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCardView {
    pub name: String,
    pub status: ToolStatus,
    pub arguments: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl From<&ToolCall> for ToolCardView {
    fn from(call: &ToolCall) -> Self {
        Self {
            name: call.name.clone(),
            status: call.status,
            arguments: call.arguments_text.clone(),
            result: call.result.clone(),
            error: call.error.clone(),
        }
    }
}

/// User-facing notice attached to a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    Error {
        message: String,
        code: Option<String>,
    },
    RateLimit {
        retry_after_secs: Option<u64>,
        message: Option<String>,
    },
    Interrupted {
        reason: Option<String>,
    },
}

/// Request to the render collaborator
///
/// The live path and reconstruction emit the same shapes so renderers
/// never need to know which one produced a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RenderRequest {
    /// Create a live streaming surface seeded with `text`
    OpenStream {
        session_id: SessionId,
        surface: SurfaceHandle,
        text: String,
    },
    /// Append streamed text to a live surface (partial formatting allowed)
    AppendStream {
        session_id: SessionId,
        surface: SurfaceHandle,
        delta: String,
    },
    /// Final, complete-formatter render of a turn's text
    FinalizeStream {
        session_id: SessionId,
        surface: Option<SurfaceHandle>,
        text: String,
    },
    /// Create or update the card for one tool call
    ToolCard {
        session_id: SessionId,
        call_id: CallId,
        card: ToolCardView,
    },
    Notice {
        session_id: SessionId,
        notice: Notice,
    },
    /// Session list entry changed (title, streaming badge)
    SessionListChanged {
        session_id: SessionId,
        title: Option<String>,
        streaming: bool,
    },
}

impl RenderRequest {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::OpenStream { session_id, .. }
            | Self::AppendStream { session_id, .. }
            | Self::FinalizeStream { session_id, .. }
            | Self::ToolCard { session_id, .. }
            | Self::Notice { session_id, .. }
            | Self::SessionListChanged { session_id, .. } => session_id,
        }
    }
}

/// Tool state carried by a reconstruction request as a hint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolHint {
    pub call_id: CallId,
    pub name: String,
    pub status: ToolStatus,
    #[serde(default)]
    pub arguments: String,
}

/// `stream:reconstruct` request issued by the UI on session switch
///
/// Hints reflect what the UI believed at switch time; the store wins
/// wherever it has data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconstructRequest {
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub buffer_hint: Option<String>,
    #[serde(default)]
    pub tools_hint: Vec<ToolHint>,
    #[serde(default)]
    pub is_streaming_hint: bool,
}

impl ReconstructRequest {
    pub fn for_session(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

/// Best-effort descriptive event for analytics sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub name: &'static str,
    pub session_id: Option<SessionId>,
    pub properties: serde_json::Value,
}

/// Best-effort numeric measurement for metrics sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetric {
    pub name: &'static str,
    pub value: f64,
    pub unit: &'static str,
    pub session_id: Option<SessionId>,
}
