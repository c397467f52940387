//! Stream reconstruction on session switch
//!
//! When the user switches to a session, the UI asks for its view to be
//! rebuilt. Hints in the request describe what the UI believed at switch
//! time; tokens may have landed in the store since, so the store wins
//! wherever it has data.
//!
//! ```text
//! store streaming?      ──yes──▶ open live surface seeded with buffer
//!        │ no
//! buffer non-empty?     ──yes──▶ single final render
//!
//! non-terminal tools    ──────▶ tool cards (terminal ones are persisted elsewhere)
//! parked notice         ──────▶ shown once
//! ```
//!
//! Reconstruction is idempotent: a session whose surface is still attached
//! and whose record has not changed since the last pass renders nothing.

use crate::bus::{EventBus, ListenerHandle, Payload, Topic};
use crate::events::{
    CallId, Notice, ReconstructRequest, RenderRequest, SessionId, ToolCardView,
};
use crate::gate::{is_active_session_message, resolve_session_id};
use crate::handlers::HandlerContext;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const INSTALL_KEY: &str = "reconstruction";

/// What a reconstruction pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructOutcome {
    pub skipped: Option<SkipReason>,
    pub opened_live: bool,
    pub finalized: bool,
    pub tool_cards: usize,
    pub notice_replayed: bool,
}

impl ReconstructOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    pub fn rendered_anything(&self) -> bool {
        self.opened_live || self.finalized || self.tool_cards > 0 || self.notice_replayed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither the request nor the gate names a session
    NoSession,
    /// The user switched away again before the request was handled
    NotActive,
}

/// Ground truth for one session, read in a single store lock
struct Snapshot {
    text: String,
    streaming: bool,
    tools: Vec<(CallId, ToolCardView)>,
    revision: u64,
    notice: Option<Notice>,
}

pub struct ReconstructionHandler {
    ctx: Arc<HandlerContext>,
    /// Store revision last reconstructed, per session
    seen: Mutex<HashMap<SessionId, u64>>,
}

impl ReconstructionHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self {
            ctx,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to `stream:reconstruct`; `None` if already installed
    pub fn install(self: &Arc<Self>, bus: &EventBus) -> Option<ListenerHandle> {
        if !bus.install_once(INSTALL_KEY) {
            tracing::debug!("Reconstruction already installed, skipping");
            return None;
        }
        let handler = Arc::clone(self);
        Some(bus.on(Topic::StreamReconstruct, move |envelope| {
            if let Payload::Reconstruct(request) = &envelope.data {
                handler.reconstruct(request);
            }
            Ok(())
        }))
    }

    pub fn reconstruct(&self, request: &ReconstructRequest) -> ReconstructOutcome {
        let active = self.ctx.active_session_id();
        let Some(session_id) = resolve_session_id(request, active.as_ref()) else {
            tracing::debug!("Reconstruction requested with no session");
            return ReconstructOutcome::skipped(SkipReason::NoSession);
        };
        if !is_active_session_message(request, active.as_ref()) {
            tracing::debug!(
                session_id = %session_id,
                active = ?active,
                "Skipping reconstruction for a session that is no longer active"
            );
            return ReconstructOutcome::skipped(SkipReason::NotActive);
        }

        let snapshot = self.snapshot(&session_id, request);
        let existing = self.ctx.surfaces().current(&session_id);
        let changed = {
            let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
            seen.insert(session_id.clone(), snapshot.revision) != Some(snapshot.revision)
        };

        let mut outcome = ReconstructOutcome::default();
        if existing.is_none() {
            if snapshot.streaming {
                let surface = self.ctx.surfaces().open(&session_id);
                self.ctx.render(RenderRequest::OpenStream {
                    session_id: session_id.clone(),
                    surface,
                    text: snapshot.text.clone(),
                });
                outcome.opened_live = true;
            } else if !snapshot.text.is_empty() {
                let surface = self.ctx.surfaces().open(&session_id);
                self.ctx.render(RenderRequest::FinalizeStream {
                    session_id: session_id.clone(),
                    surface: Some(surface),
                    text: snapshot.text.clone(),
                });
                outcome.finalized = true;
            }
        }

        let fresh_view = outcome.opened_live || outcome.finalized;
        if fresh_view || changed {
            for (call_id, card) in snapshot.tools {
                self.ctx.render(RenderRequest::ToolCard {
                    session_id: session_id.clone(),
                    call_id,
                    card,
                });
                outcome.tool_cards += 1;
            }
        }

        if let Some(notice) = snapshot.notice {
            self.ctx.render(RenderRequest::Notice {
                session_id: session_id.clone(),
                notice,
            });
            outcome.notice_replayed = true;
        }

        tracing::debug!(
            session_id = %session_id,
            outcome = ?outcome,
            hint_streaming = request.is_streaming_hint,
            "Reconstructed session view"
        );
        if outcome.rendered_anything() {
            self.ctx.analytics(
                "stream_reconstructed",
                Some(&session_id),
                json!({
                    "live": outcome.opened_live,
                    "tool_cards": outcome.tool_cards,
                    "hint_disagreed": request.is_streaming_hint != snapshot.streaming,
                }),
            );
        }
        outcome
    }

    fn snapshot(&self, session_id: &SessionId, request: &ReconstructRequest) -> Snapshot {
        let mut store = self.ctx.store();
        let notice = store.take_pending_notice(session_id);
        let hint_text = request.buffer_hint.clone().unwrap_or_default();

        let Some(record) = store.record(session_id) else {
            // Nothing in the store: the hints are all there is, but a
            // session the store never saw cannot be streaming.
            return Snapshot {
                text: hint_text,
                streaming: false,
                tools: request
                    .tools_hint
                    .iter()
                    .filter(|hint| !hint.status.is_terminal())
                    .map(|hint| {
                        (
                            hint.call_id.clone(),
                            ToolCardView {
                                name: hint.name.clone(),
                                status: hint.status,
                                arguments: hint.arguments.clone(),
                                result: None,
                                error: None,
                            },
                        )
                    })
                    .collect(),
                revision: 0,
                notice,
            };
        };

        let text = if record.text_buffer().is_empty() {
            hint_text
        } else {
            record.text_buffer().to_string()
        };
        Snapshot {
            text,
            streaming: record.is_streaming(),
            tools: record
                .tool_events()
                .iter()
                .filter(|(_, call)| !call.status.is_terminal())
                .map(|(id, call)| (id.clone(), ToolCardView::from(call)))
                .collect(),
            revision: record.revision(),
            notice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SessionId, ToolHint};
    use crate::store::ToolStatus;
    use crate::testing::Harness;
    use serde_json::json;

    #[test]
    fn test_store_beats_stale_hint() {
        let h = Harness::with_active(Some("S1"));
        h.deliver(json!({"type": "assistant_start", "session_id": "S2"}));
        h.deliver(json!({"type": "assistant_delta", "session_id": "S2", "content": "partial"}));

        h.switch_to("S2");
        let mut request = ReconstructRequest::for_session("S2");
        request.buffer_hint = Some("par".into());
        request.is_streaming_hint = false;
        let outcome = h.reconstruction.reconstruct(&request);

        assert!(outcome.opened_live);
        assert!(!outcome.finalized);
        assert_eq!(
            h.renders_for("S2"),
            vec![RenderRequest::OpenStream {
                session_id: SessionId::from("S2"),
                surface: h.surface_of("S2").unwrap(),
                text: "partial".into(),
            }]
        );
    }

    #[test]
    fn test_second_pass_renders_nothing() {
        let h = Harness::with_active(Some("S1"));
        h.deliver(json!({"type": "assistant_start", "session_id": "S2"}));
        h.deliver(json!({"type": "assistant_delta", "session_id": "S2", "content": "hi"}));
        h.deliver(json!({"type": "function_detected", "session_id": "S2", "tool_call_id": "c1", "tool_name": "grep"}));

        h.switch_to("S2");
        let first = h.reconstruction.reconstruct(&ReconstructRequest::for_session("S2"));
        let second = h.reconstruction.reconstruct(&ReconstructRequest::for_session("S2"));

        assert!(first.opened_live);
        assert_eq!(first.tool_cards, 1);
        assert!(!second.rendered_anything());
        assert_eq!(h.surfaces.opened(), 1);
    }

    #[test]
    fn test_finished_turn_gets_single_final_render() {
        let h = Harness::with_active(Some("S1"));
        h.deliver(json!({"type": "assistant_start", "session_id": "S2"}));
        h.deliver(json!({"type": "assistant_delta", "session_id": "S2", "content": "done"}));
        h.deliver(json!({"type": "assistant_end", "session_id": "S2"}));

        h.switch_to("S2");
        let outcome = h.reconstruction.reconstruct(&ReconstructRequest::for_session("S2"));
        assert!(outcome.finalized);
        assert!(!outcome.opened_live);

        let again = h.reconstruction.reconstruct(&ReconstructRequest::for_session("S2"));
        assert!(!again.rendered_anything());
    }

    #[test]
    fn test_terminal_tools_are_not_replayed() {
        let h = Harness::with_active(Some("S1"));
        for msg in [
            json!({"type": "assistant_start", "session_id": "S2"}),
            json!({"type": "function_detected", "session_id": "S2", "tool_call_id": "done", "tool_name": "a"}),
            json!({"type": "function_completed", "session_id": "S2", "tool_call_id": "done", "tool_success": true}),
            json!({"type": "function_detected", "session_id": "S2", "tool_call_id": "open", "tool_name": "b"}),
        ] {
            h.deliver(msg);
        }

        h.switch_to("S2");
        h.reconstruction.reconstruct(&ReconstructRequest::for_session("S2"));
        let cards: Vec<CallId> = h
            .renders_for("S2")
            .into_iter()
            .filter_map(|r| match r {
                RenderRequest::ToolCard { call_id, .. } => Some(call_id),
                _ => None,
            })
            .collect();
        assert_eq!(cards, vec![CallId::from("open")]);
    }

    #[test]
    fn test_stale_request_after_switching_away_is_skipped() {
        let h = Harness::with_active(Some("S1"));
        h.deliver(json!({"type": "assistant_start", "session_id": "S2"}));
        let outcome = h.reconstruction.reconstruct(&ReconstructRequest::for_session("S2"));
        assert_eq!(outcome.skipped, Some(SkipReason::NotActive));
        assert!(h.renders_for("S2").is_empty());
    }

    #[test]
    fn test_request_without_session_targets_active() {
        let h = Harness::with_active(Some("S1"));
        h.deliver(json!({"type": "assistant_delta", "session_id": "S2", "content": "bg"}));
        h.switch_to("S2");

        let outcome = h.reconstruction.reconstruct(&ReconstructRequest::default());
        assert!(outcome.opened_live);
        assert_eq!(h.surfaces.opened(), 1);

        h.active.set(None);
        let outcome = h.reconstruction.reconstruct(&ReconstructRequest::default());
        assert_eq!(outcome.skipped, Some(SkipReason::NoSession));
    }

    #[test]
    fn test_hints_used_for_unknown_session() {
        let h = Harness::with_active(Some("S9"));
        let request = ReconstructRequest {
            session_id: Some(SessionId::from("S9")),
            buffer_hint: Some("from the ui".into()),
            tools_hint: vec![
                ToolHint {
                    call_id: CallId::from("t1"),
                    name: "ls".into(),
                    status: ToolStatus::Executing,
                    arguments: String::new(),
                },
                ToolHint {
                    call_id: CallId::from("t2"),
                    name: "cat".into(),
                    status: ToolStatus::Completed,
                    arguments: String::new(),
                },
            ],
            is_streaming_hint: true,
        };
        let outcome = h.reconstruction.reconstruct(&request);
        assert!(outcome.finalized, "a session the store never saw is not streaming");
        assert_eq!(outcome.tool_cards, 1);
    }

    #[test]
    fn test_parked_notice_replayed_once() {
        let h = Harness::with_active(Some("S1"));
        h.deliver(json!({"type": "rate_limit", "session_id": "S2", "retry_after_secs": 30}));

        h.switch_to("S2");
        let first = h.reconstruction.reconstruct(&ReconstructRequest::for_session("S2"));
        let second = h.reconstruction.reconstruct(&ReconstructRequest::for_session("S2"));
        assert!(first.notice_replayed);
        assert!(!second.notice_replayed);
    }

    #[test]
    fn test_reconstruct_topic_drives_handler() {
        let h = Harness::with_active(Some("S1"));
        h.deliver(json!({"type": "assistant_start", "session_id": "S2"}));
        h.deliver(json!({"type": "assistant_delta", "session_id": "S2", "content": "x"}));
        h.switch_to("S2");

        h.engine.request_reconstruct(ReconstructRequest::for_session("S2"));
        assert!(matches!(
            h.renders_for("S2").as_slice(),
            [RenderRequest::OpenStream { text, .. }] if text == "x"
        ));
    }
}
