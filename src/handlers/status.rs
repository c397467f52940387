//! Turn-level status: interruption, errors, rate limiting
//!
//! Errors and interruptions end the turn the same way a normal end does,
//! including the queue release, so a failed turn never blocks later input.
//! Notices for background sessions are parked on the record and shown once
//! on reconstruction.

use super::{HandlerContext, Route, TypeHandler};
use crate::collaborators::ReleaseReason;
use crate::events::{BackendMessage, MessageKind, Notice, RenderRequest, ToolCardView};
use serde_json::json;

pub struct StatusHandler;

impl TypeHandler for StatusHandler {
    fn name(&self) -> &'static str {
        "turn_status"
    }

    fn kinds(&self) -> &'static [MessageKind] {
        &[
            MessageKind::Interrupted,
            MessageKind::Error,
            MessageKind::RateLimit,
        ]
    }

    fn handle(&self, message: &BackendMessage, ctx: &HandlerContext) -> anyhow::Result<()> {
        let route = ctx.route(message);
        match message {
            BackendMessage::Interrupted { reason, .. } => {
                if let Some(route) = route {
                    on_interrupted(&route, reason.clone(), ctx);
                }
            }
            BackendMessage::Error { message, code, .. } => {
                let notice = Notice::Error {
                    message: message.clone(),
                    code: code.clone(),
                };
                match route {
                    Some(route) => on_error(&route, notice, ctx),
                    None => {
                        tracing::debug!(error = %message, "Releasing queue after unroutable error");
                        ctx.schedule_release(None, ReleaseReason::Error);
                    }
                }
            }
            BackendMessage::RateLimit {
                retry_after_secs,
                message,
                ..
            } => {
                if let Some(route) = route {
                    let notice = Notice::RateLimit {
                        retry_after_secs: *retry_after_secs,
                        message: message.clone(),
                    };
                    show_or_park(&route, notice, ctx);
                    ctx.analytics(
                        "rate_limited",
                        Some(&route.session_id),
                        json!({ "retry_after_secs": retry_after_secs }),
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn on_interrupted(route: &Route, reason: Option<String>, ctx: &HandlerContext) {
    let session_id = &route.session_id;
    let (interrupted, was_streaming) = {
        let mut store = ctx.store();
        let interrupted = store.interrupt_tools(session_id);
        (interrupted, store.end_stream(session_id))
    };
    tracing::info!(
        session_id = %session_id,
        tools = interrupted.len(),
        was_streaming,
        "Turn interrupted"
    );

    for (call_id, _) in &interrupted {
        ctx.schedule_eviction(session_id, call_id);
    }
    if route.live {
        for (call_id, call) in &interrupted {
            ctx.render(RenderRequest::ToolCard {
                session_id: session_id.clone(),
                call_id: call_id.clone(),
                card: ToolCardView::from(call),
            });
        }
        ctx.finalize_visible(session_id);
        ctx.render(RenderRequest::Notice {
            session_id: session_id.clone(),
            notice: Notice::Interrupted { reason },
        });
    }
    ctx.session_list_changed(session_id);
    ctx.schedule_release(Some(session_id), ReleaseReason::Interrupted);
    ctx.analytics(
        "turn_interrupted",
        Some(session_id),
        json!({ "tools": interrupted.len(), "live": route.live }),
    );
}

fn on_error(route: &Route, notice: Notice, ctx: &HandlerContext) {
    let session_id = &route.session_id;
    let was_streaming = ctx.store().end_stream(session_id);
    tracing::warn!(session_id = %session_id, notice = ?notice, "Backend reported an error");

    if route.live && was_streaming {
        ctx.finalize_visible(session_id);
    }
    show_or_park(route, notice, ctx);
    if was_streaming {
        ctx.session_list_changed(session_id);
    }
    ctx.schedule_release(Some(session_id), ReleaseReason::Error);
    ctx.analytics("turn_failed", Some(session_id), json!({ "live": route.live }));
}

/// Render now if live, otherwise keep for the next reconstruction
fn show_or_park(route: &Route, notice: Notice, ctx: &HandlerContext) {
    if route.live {
        ctx.render(RenderRequest::Notice {
            session_id: route.session_id.clone(),
            notice,
        });
    } else {
        ctx.store().set_pending_notice(&route.session_id, notice);
    }
}
