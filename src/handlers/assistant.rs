//! Assistant text stream: start, delta, end

use super::{HandlerContext, Route, TypeHandler};
use crate::collaborators::ReleaseReason;
use crate::events::{BackendMessage, MessageKind, RenderRequest};
use serde_json::json;
use std::time::Instant;

pub struct AssistantStreamHandler;

impl TypeHandler for AssistantStreamHandler {
    fn name(&self) -> &'static str {
        "assistant_stream"
    }

    fn kinds(&self) -> &'static [MessageKind] {
        &[
            MessageKind::AssistantStart,
            MessageKind::AssistantDelta,
            MessageKind::AssistantEnd,
        ]
    }

    fn handle(&self, message: &BackendMessage, ctx: &HandlerContext) -> anyhow::Result<()> {
        let Some(route) = ctx.route(message) else {
            return Ok(());
        };
        match message {
            BackendMessage::AssistantStart { message_id, .. } => {
                on_start(&route, message_id.as_deref(), ctx)
            }
            BackendMessage::AssistantDelta { content, .. } => on_delta(&route, content, ctx),
            BackendMessage::AssistantEnd { finish_reason, .. } => {
                on_end(&route, finish_reason.as_deref(), ctx)
            }
            _ => {}
        }
        Ok(())
    }
}

fn on_start(route: &Route, message_id: Option<&str>, ctx: &HandlerContext) {
    let session_id = &route.session_id;
    let turn = ctx.store().begin_turn(session_id, Instant::now());
    tracing::debug!(
        session_id = %session_id,
        turn,
        live = route.live,
        message_id = ?message_id,
        "Assistant turn started"
    );

    if route.live {
        let surface = ctx.surfaces().open(session_id);
        ctx.render(RenderRequest::OpenStream {
            session_id: session_id.clone(),
            surface,
            text: String::new(),
        });
    }
    ctx.session_list_changed(session_id);
    ctx.analytics(
        "turn_started",
        Some(session_id),
        json!({ "turn": turn, "live": route.live }),
    );
}

fn on_delta(route: &Route, content: &str, ctx: &HandlerContext) {
    let session_id = &route.session_id;
    let started = {
        let mut store = ctx.store();
        // A delta without a start still belongs to a turn in progress
        let started = !store.is_streaming(session_id);
        if started {
            store.start_stream(session_id);
        }
        store.append_to_buffer(session_id, content);
        started
    };
    if started {
        ctx.session_list_changed(session_id);
    }

    if !route.live {
        return;
    }
    let (surface, opened) = ctx.live_surface(session_id);
    if !opened {
        ctx.render(RenderRequest::AppendStream {
            session_id: session_id.clone(),
            surface,
            delta: content.to_string(),
        });
    }
}

fn on_end(route: &Route, finish_reason: Option<&str>, ctx: &HandlerContext) {
    let session_id = &route.session_id;
    let (was_streaming, chars, tools, started_at) = {
        let mut store = ctx.store();
        let was_streaming = store.end_stream(session_id);
        let record = store.record(session_id);
        (
            was_streaming,
            record.map(|r| r.text_buffer().chars().count()).unwrap_or(0),
            record.map(|r| r.tool_events().len()).unwrap_or(0),
            record.and_then(|r| r.turn_started_at()),
        )
    };
    tracing::debug!(
        session_id = %session_id,
        live = route.live,
        was_streaming,
        finish_reason = ?finish_reason,
        "Assistant turn ended"
    );

    if route.live {
        ctx.finalize_visible(session_id);
    }
    ctx.session_list_changed(session_id);
    ctx.schedule_release(Some(session_id), ReleaseReason::TurnEnded);

    if let (true, Some(started_at)) = (was_streaming, started_at) {
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        ctx.metric("turn_duration_ms", elapsed_ms, "ms", Some(session_id));
    }
    ctx.analytics(
        "turn_completed",
        Some(session_id),
        json!({
            "chars": chars,
            "tools": tools,
            "finish_reason": finish_reason,
            "live": route.live,
        }),
    );
}
