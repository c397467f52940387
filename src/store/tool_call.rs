//! Tool-call lifecycle state machine
//!
//! ```text
//! [Detected] ──args delta──▶ [StreamingArgs] ──args done──▶ [Ready]
//!     │                            │                           │
//!     └────────────────────────────┴──────── executing ────────┴──▶ [Executing]
//!                                                                      │
//!                                  ┌──────────────┬────────────────────┤
//!                                  ▼              ▼                    ▼
//!                            [Completed]       [Error]          [Interrupted]
//! ```
//!
//! Terminal states accept no further updates. Any non-terminal state may
//! jump straight to a terminal one (a call can fail before it executes).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Argument text that means "nothing yet"
const EMPTY_ARGUMENTS_PLACEHOLDER: &str = "{}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Detected,
    StreamingArgs,
    Ready,
    Executing,
    Completed,
    Error,
    Interrupted,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Interrupted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::StreamingArgs => "streaming_args",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a tool call ended
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Completed { result: Option<serde_json::Value> },
    Failed {
        error: Option<String>,
        result: Option<serde_json::Value>,
    },
    /// User cancelled; not a failure
    Interrupted,
}

impl ToolOutcome {
    /// Map a completion message's flags onto an outcome
    ///
    /// A cancelled call is reported as `Interrupted` even though the backend
    /// also marks it unsuccessful.
    pub fn from_completion(
        success: bool,
        interrupted: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Self {
        if interrupted {
            Self::Interrupted
        } else if success {
            Self::Completed { result }
        } else {
            Self::Failed { error, result }
        }
    }

    pub fn status(&self) -> ToolStatus {
        match self {
            Self::Completed { .. } => ToolStatus::Completed,
            Self::Failed { .. } => ToolStatus::Error,
            Self::Interrupted => ToolStatus::Interrupted,
        }
    }
}

/// One update to a tool call, as buffered per session
#[derive(Debug, Clone, PartialEq)]
pub enum ToolUpdate {
    /// First sighting; `arguments` may already be present
    Start {
        name: String,
        arguments: Option<String>,
    },
    ArgumentsDelta { delta: String },
    /// Explicit "arguments complete" signal from the backend
    ArgumentsDone { arguments: Option<String> },
    Executing {
        name: Option<String>,
        arguments: Option<String>,
    },
    End(ToolOutcome),
}

/// Result of applying a `ToolUpdate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolTransition {
    Created(ToolStatus),
    Updated { from: ToolStatus, to: ToolStatus },
    Rejected(RejectReason),
}

impl ToolTransition {
    /// Status after the update, if it was accepted
    pub fn status(self) -> Option<ToolStatus> {
        match self {
            Self::Created(status) | Self::Updated { to: status, .. } => Some(status),
            Self::Rejected(_) => None,
        }
    }

    /// True when this update moved the call into a terminal state
    pub fn became_terminal(self) -> bool {
        match self {
            Self::Created(status) => status.is_terminal(),
            Self::Updated { from, to } => !from.is_terminal() && to.is_terminal(),
            Self::Rejected(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The call already reached this terminal status
    Terminal(ToolStatus),
    /// The call id belongs to a different session
    ForeignSession,
    /// The call was evicted earlier in this turn
    Evicted,
    /// Argument text after the explicit arguments-done signal
    ArgumentsComplete,
}

/// Buffered state of one tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub status: ToolStatus,
    pub arguments_text: String,
    /// Set once an explicit arguments-done signal arrives
    pub arguments_complete: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ToolCall {
    fn blank(status: ToolStatus) -> Self {
        Self {
            name: String::new(),
            status,
            arguments_text: String::new(),
            arguments_complete: false,
            result: None,
            error: None,
        }
    }

    /// Build the entry for a call id seen for the first time
    pub(crate) fn create(update: ToolUpdate) -> Self {
        let mut call = Self::blank(ToolStatus::Detected);
        call.apply_unchecked(update);
        call
    }

    /// Apply an update to an existing entry
    pub(crate) fn apply(&mut self, update: ToolUpdate) -> ToolTransition {
        if self.status.is_terminal() {
            return ToolTransition::Rejected(RejectReason::Terminal(self.status));
        }
        if self.arguments_complete && matches!(update, ToolUpdate::ArgumentsDelta { .. }) {
            tracing::trace!(name = %self.name, "Dropping argument delta after arguments done");
            return ToolTransition::Rejected(RejectReason::ArgumentsComplete);
        }
        let from = self.status;
        self.apply_unchecked(update);
        ToolTransition::Updated {
            from,
            to: self.status,
        }
    }

    fn apply_unchecked(&mut self, update: ToolUpdate) {
        match update {
            ToolUpdate::Start { name, arguments } => {
                if !name.is_empty() {
                    self.name = name;
                }
                if let Some(arguments) = arguments {
                    self.arguments_text = arguments;
                }
                // Fallback heuristic only: no explicit signal has arrived yet
                if self.status == ToolStatus::Detected && arguments_look_complete(&self.arguments_text)
                {
                    self.status = ToolStatus::Ready;
                }
            }
            ToolUpdate::ArgumentsDelta { delta } => {
                self.arguments_text.push_str(&delta);
                if matches!(self.status, ToolStatus::Detected | ToolStatus::Ready) {
                    self.status = ToolStatus::StreamingArgs;
                }
            }
            ToolUpdate::ArgumentsDone { arguments } => {
                if let Some(arguments) = arguments {
                    self.arguments_text = arguments;
                }
                self.arguments_complete = true;
                if matches!(self.status, ToolStatus::Detected | ToolStatus::StreamingArgs) {
                    self.status = ToolStatus::Ready;
                }
            }
            ToolUpdate::Executing { name, arguments } => {
                if let Some(name) = name.filter(|n| !n.is_empty()) {
                    self.name = name;
                }
                if let Some(arguments) = arguments.filter(|a| !a.is_empty()) {
                    if self.arguments_text.is_empty() {
                        self.arguments_text = arguments;
                    }
                }
                self.status = ToolStatus::Executing;
            }
            ToolUpdate::End(outcome) => {
                self.status = outcome.status();
                match outcome {
                    ToolOutcome::Completed { result } => self.result = result,
                    ToolOutcome::Failed { error, result } => {
                        self.error = error;
                        self.result = result;
                    }
                    ToolOutcome::Interrupted => {}
                }
            }
        }
    }
}

/// Placeholder heuristic for readiness when no explicit signal exists
pub fn arguments_look_complete(arguments: &str) -> bool {
    let trimmed = arguments.trim();
    !trimmed.is_empty() && trimmed != EMPTY_ARGUMENTS_PLACEHOLDER
}
