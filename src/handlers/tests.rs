//! Handler behaviour, driven end to end through the engine

use crate::collaborators::ReleaseReason;
use crate::events::{CallId, Notice, RenderRequest, SessionId};
use crate::store::ToolStatus;
use crate::testing::Harness;
use serde_json::json;
use std::time::{Duration, Instant};

fn sid(s: &str) -> SessionId {
    SessionId::from(s)
}

fn card_statuses(renders: &[RenderRequest]) -> Vec<ToolStatus> {
    renders
        .iter()
        .filter_map(|r| match r {
            RenderRequest::ToolCard { card, .. } => Some(card.status),
            _ => None,
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Assistant stream
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_live_turn_render_sequence() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "assistant_start"}));
    h.deliver(json!({"type": "assistant_delta", "content": "Hel"}));
    h.deliver(json!({"type": "assistant_delta", "content": "lo"}));
    h.deliver(json!({"type": "assistant_end"}));

    let surface = h.surface_of("S1").expect("surface stays attached after finalize");
    assert_eq!(
        h.renders_for("S1"),
        vec![
            RenderRequest::OpenStream {
                session_id: sid("S1"),
                surface,
                text: String::new(),
            },
            RenderRequest::AppendStream {
                session_id: sid("S1"),
                surface,
                delta: "Hel".into(),
            },
            RenderRequest::AppendStream {
                session_id: sid("S1"),
                surface,
                delta: "lo".into(),
            },
            RenderRequest::FinalizeStream {
                session_id: sid("S1"),
                surface: Some(surface),
                text: "Hello".into(),
            },
        ]
    );
}

#[test]
fn test_background_turn_only_updates_store_and_badge() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "assistant_start", "session_id": "S2"}));
    h.deliver(json!({"type": "assistant_delta", "session_id": "S2", "content": "quiet"}));
    assert!(h.store().is_streaming(&sid("S2")));
    h.deliver(json!({"type": "assistant_end", "session_id": "S2"}));

    assert!(h.renders_for("S2").is_empty());
    assert_eq!(h.surface_of("S2"), None);
    assert_eq!(h.store().get_buffer(&sid("S2")), "quiet");

    let badges: Vec<bool> = h
        .all_renders()
        .into_iter()
        .filter_map(|r| match r {
            RenderRequest::SessionListChanged { streaming, .. } => Some(streaming),
            _ => None,
        })
        .collect();
    assert_eq!(badges, vec![true, false]);
}

#[test]
fn test_delta_without_start_opens_seeded_surface() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "assistant_delta", "content": "abc"}));

    assert!(h.store().is_streaming(&sid("S1")));
    assert!(matches!(
        h.renders_for("S1").as_slice(),
        [RenderRequest::OpenStream { text, .. }] if text == "abc"
    ));
}

#[test]
fn test_new_turn_clears_previous_text() {
    let h = Harness::with_active(Some("S1"));
    for content in ["first", "second"] {
        h.deliver(json!({"type": "assistant_start"}));
        h.deliver(json!({"type": "assistant_delta", "content": content}));
        h.deliver(json!({"type": "assistant_end"}));
    }
    let store = h.store();
    assert_eq!(store.get_buffer(&sid("S1")), "second");
    assert_eq!(store.record(&sid("S1")).map(|r| r.turn()), Some(2));
}

#[test]
fn test_turn_end_reports_and_releases_queue() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "assistant_start"}));
    h.deliver(json!({"type": "assistant_delta", "content": "done"}));
    h.deliver(json!({"type": "assistant_end", "finish_reason": "stop"}));

    assert!(h.outbound.releases().is_empty(), "release waits for the tick");
    assert_eq!(h.engine.tick(Instant::now()), 1);
    assert_eq!(
        h.outbound.releases(),
        vec![(Some(sid("S1")), ReleaseReason::TurnEnded)]
    );

    let metrics = h.metrics();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].name, "turn_duration_ms");
    assert!(metrics[0].value >= 0.0);
    assert!(h.analytics_names().contains(&"turn_completed"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool calls
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_live_tool_card_follows_lifecycle() {
    let h = Harness::with_active(Some("S1"));
    for msg in [
        json!({"type": "function_detected", "tool_call_id": "c1", "tool_name": "search"}),
        json!({"type": "function_arguments_delta", "tool_call_id": "c1", "delta": "{\"q\":"}),
        json!({"type": "function_arguments_delta", "tool_call_id": "c1", "delta": "\"rust\"}"}),
        json!({"type": "function_arguments_done", "tool_call_id": "c1"}),
        json!({"type": "function_executing", "tool_call_id": "c1"}),
        json!({"type": "function_completed", "tool_call_id": "c1", "tool_success": true, "tool_result": "ok"}),
    ] {
        h.deliver(msg);
    }

    assert_eq!(
        card_statuses(&h.renders_for("S1")),
        vec![
            ToolStatus::Detected,
            ToolStatus::StreamingArgs,
            ToolStatus::StreamingArgs,
            ToolStatus::Ready,
            ToolStatus::Executing,
            ToolStatus::Completed,
        ]
    );
    let store = h.store();
    let call = store.tool(&sid("S1"), &CallId::from("c1")).unwrap();
    assert_eq!(call.arguments_text, "{\"q\":\"rust\"}");
    assert_eq!(call.result, Some(json!("ok")));
}

#[test]
fn test_placeholder_arguments_are_not_ready() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "function_detected", "tool_call_id": "a", "tool_name": "ls", "tool_arguments": "{}"}));
    h.deliver(json!({"type": "function_detected", "tool_call_id": "b", "tool_name": "ls", "tool_arguments": {"path": "/"}}));

    let store = h.store();
    assert_eq!(
        store.tool(&sid("S1"), &CallId::from("a")).map(|c| c.status),
        Some(ToolStatus::Detected)
    );
    assert_eq!(
        store.tool(&sid("S1"), &CallId::from("b")).map(|c| c.status),
        Some(ToolStatus::Ready)
    );
}

#[test]
fn test_cancelled_completion_is_interrupted_not_error() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "function_detected", "tool_call_id": "c1", "tool_name": "bash"}));
    h.deliver(json!({"type": "function_completed", "tool_call_id": "c1", "tool_success": false, "interrupted": true}));
    h.deliver(json!({"type": "function_detected", "tool_call_id": "c2", "tool_name": "bash"}));
    h.deliver(json!({"type": "function_completed", "tool_call_id": "c2", "tool_success": false, "tool_error": "exit 1"}));

    let store = h.store();
    let c1 = store.tool(&sid("S1"), &CallId::from("c1")).unwrap();
    let c2 = store.tool(&sid("S1"), &CallId::from("c2")).unwrap();
    assert_eq!(c1.status, ToolStatus::Interrupted);
    assert_eq!(c2.status, ToolStatus::Error);
    assert_eq!(c2.error.as_deref(), Some("exit 1"));
}

#[test]
fn test_call_id_from_another_session_is_rejected() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "function_detected", "session_id": "S1", "tool_call_id": "c1", "tool_name": "a"}));
    h.deliver(json!({"type": "function_completed", "session_id": "S2", "tool_call_id": "c1", "tool_success": true}));

    let store = h.store();
    assert_eq!(
        store.tool(&sid("S1"), &CallId::from("c1")).map(|c| c.status),
        Some(ToolStatus::Detected)
    );
    assert!(store.tool(&sid("S2"), &CallId::from("c1")).is_none());
}

#[test]
fn test_terminal_tool_evicted_after_grace() {
    let h = Harness::with_grace(Some("S1"), Duration::from_secs(5));
    h.deliver(json!({"type": "function_detected", "tool_call_id": "done", "tool_name": "a"}));
    h.deliver(json!({"type": "function_completed", "tool_call_id": "done", "tool_success": true}));
    h.deliver(json!({"type": "function_detected", "tool_call_id": "open", "tool_name": "b"}));

    assert_eq!(h.engine.tick(Instant::now()), 0, "grace not yet elapsed");
    assert_eq!(h.engine.tick(Instant::now() + Duration::from_secs(6)), 1);

    let store = h.store();
    assert!(store.tool(&sid("S1"), &CallId::from("done")).is_none());
    assert!(store.tool(&sid("S1"), &CallId::from("open")).is_some());
}

#[test]
fn test_late_update_after_eviction_is_ignored() {
    let h = Harness::with_grace(Some("S1"), Duration::from_secs(5));
    h.deliver(json!({"type": "assistant_start"}));
    h.deliver(json!({"type": "function_detected", "tool_call_id": "c1", "tool_name": "grep"}));
    h.deliver(json!({"type": "function_completed", "tool_call_id": "c1", "tool_success": true}));
    assert_eq!(h.engine.tick(Instant::now() + Duration::from_secs(6)), 1);
    let cards_before = card_statuses(&h.renders_for("S1")).len();

    h.deliver(json!({"type": "function_executing", "tool_call_id": "c1"}));

    assert!(h.store().tool(&sid("S1"), &CallId::from("c1")).is_none());
    assert_eq!(card_statuses(&h.renders_for("S1")).len(), cards_before);
    assert_eq!(h.engine.health().pending_tasks, 0);
}

#[test]
fn test_arguments_frozen_after_done() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "function_detected", "tool_call_id": "c1", "tool_name": "search"}));
    h.deliver(json!({"type": "function_arguments_done", "tool_call_id": "c1", "tool_arguments": {"q": 1}}));
    h.deliver(json!({"type": "function_executing", "tool_call_id": "c1"}));
    h.deliver(json!({"type": "function_arguments_delta", "tool_call_id": "c1", "delta": "}"}));

    let store = h.store();
    let call = store.tool(&sid("S1"), &CallId::from("c1")).unwrap();
    assert_eq!(call.arguments_text, r#"{"q":1}"#);
    assert_eq!(call.status, ToolStatus::Executing);
}

#[test]
fn test_background_tool_never_rendered() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "function_detected", "session_id": "S2", "tool_call_id": "c1", "tool_name": "search"}));
    h.deliver(json!({"type": "function_executing", "session_id": "S2", "tool_call_id": "c1"}));

    assert!(h.renders_for("S2").is_empty());
    assert_eq!(
        h.store().tool(&sid("S2"), &CallId::from("c1")).map(|c| c.status),
        Some(ToolStatus::Executing)
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_interrupt_cancels_pending_tools_and_ends_turn() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "assistant_start"}));
    h.deliver(json!({"type": "assistant_delta", "content": "working"}));
    h.deliver(json!({"type": "function_detected", "tool_call_id": "c1", "tool_name": "bash"}));
    h.deliver(json!({"type": "function_executing", "tool_call_id": "c1"}));
    h.deliver(json!({"type": "interrupted", "reason": "user"}));

    assert!(!h.store().is_streaming(&sid("S1")));
    assert_eq!(
        h.store().tool(&sid("S1"), &CallId::from("c1")).map(|c| c.status),
        Some(ToolStatus::Interrupted)
    );

    let renders = h.renders_for("S1");
    assert_eq!(card_statuses(&renders).last(), Some(&ToolStatus::Interrupted));
    assert!(renders.iter().any(|r| matches!(
        r,
        RenderRequest::FinalizeStream { text, .. } if text == "working"
    )));
    assert!(matches!(
        renders.last(),
        Some(RenderRequest::Notice { notice: Notice::Interrupted { reason }, .. })
            if reason.as_deref() == Some("user")
    ));

    h.engine.tick(Instant::now());
    assert_eq!(
        h.outbound.releases(),
        vec![(Some(sid("S1")), ReleaseReason::Interrupted)]
    );
}

#[test]
fn test_background_error_parks_notice_and_releases() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "assistant_start", "session_id": "S2"}));
    h.deliver(json!({"type": "error", "session_id": "S2", "message": "overloaded", "code": "529"}));

    assert!(h.renders_for("S2").is_empty());
    assert!(!h.store().is_streaming(&sid("S2")));
    assert_eq!(
        h.store().take_pending_notice(&sid("S2")),
        Some(Notice::Error {
            message: "overloaded".into(),
            code: Some("529".into()),
        })
    );

    h.engine.tick(Instant::now());
    assert_eq!(
        h.outbound.releases(),
        vec![(Some(sid("S2")), ReleaseReason::Error)]
    );
}

#[test]
fn test_every_turn_end_releases_once() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "assistant_start"}));
    h.deliver(json!({"type": "error", "message": "overloaded"}));
    h.deliver(json!({"type": "assistant_start"}));
    h.deliver(json!({"type": "assistant_end"}));

    assert_eq!(h.engine.tick(Instant::now()), 2);
    assert_eq!(
        h.outbound.releases(),
        vec![
            (Some(sid("S1")), ReleaseReason::Error),
            (Some(sid("S1")), ReleaseReason::TurnEnded),
        ]
    );
    assert_eq!(h.engine.tick(Instant::now()), 0);
}

#[test]
fn test_unroutable_error_still_releases_queue() {
    let h = Harness::with_active(None);
    h.deliver(json!({"type": "error", "message": "boom"}));

    assert!(h.store().is_empty());
    assert!(h.analytics_names().contains(&"unroutable_message"));
    h.engine.tick(Instant::now());
    assert_eq!(h.outbound.releases(), vec![(None, ReleaseReason::Error)]);
}

#[test]
fn test_live_rate_limit_shows_notice() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "rate_limit", "retry_after_secs": 12}));

    assert_eq!(
        h.renders_for("S1"),
        vec![RenderRequest::Notice {
            session_id: sid("S1"),
            notice: Notice::RateLimit {
                retry_after_secs: Some(12),
                message: None,
            },
        }]
    );
    assert!(h.analytics_names().contains(&"rate_limited"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Session lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_title_for_background_session_updates_list() {
    let h = Harness::with_active(Some("S1"));
    h.deliver(json!({"type": "session_created", "session_id": "S2"}));
    h.deliver(json!({"type": "session_title", "session_id": "S2", "title": "Refactor parser"}));

    assert_eq!(
        h.all_renders().last(),
        Some(&RenderRequest::SessionListChanged {
            session_id: sid("S2"),
            title: Some("Refactor parser".into()),
            streaming: false,
        })
    );
    assert_eq!(
        h.store().record(&sid("S2")).and_then(|r| r.title()),
        Some("Refactor parser")
    );
}

#[test]
fn test_handlers_install_once_per_bus() {
    let h = Harness::with_active(Some("S1"));
    let ctx = std::sync::Arc::new(super::HandlerContext::new(
        h.engine.bus(),
        h.engine.store().clone(),
        h.active.clone(),
        h.surfaces.clone(),
        h.outbound.clone(),
        Duration::ZERO,
    ));
    let again = super::install(h.engine.bus(), ctx, super::default_handlers());
    assert!(again.is_empty());

    h.deliver(json!({"type": "assistant_delta", "content": "x"}));
    assert_eq!(h.store().get_buffer(&sid("S1")), "x");
}
