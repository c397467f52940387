//! Tool-call lifecycle messages

use super::{HandlerContext, TypeHandler};
use crate::events::{BackendMessage, CallId, MessageKind, RenderRequest, ToolCardView};
use crate::store::{ToolOutcome, ToolTransition, ToolUpdate};
use serde_json::json;

pub struct ToolCallHandler;

impl TypeHandler for ToolCallHandler {
    fn name(&self) -> &'static str {
        "tool_calls"
    }

    fn kinds(&self) -> &'static [MessageKind] {
        &[
            MessageKind::FunctionDetected,
            MessageKind::FunctionArgumentsDelta,
            MessageKind::FunctionArgumentsDone,
            MessageKind::FunctionExecuting,
            MessageKind::FunctionCompleted,
        ]
    }

    fn handle(&self, message: &BackendMessage, ctx: &HandlerContext) -> anyhow::Result<()> {
        let Some((call_id, update)) = tool_update(message) else {
            return Ok(());
        };
        let Some(route) = ctx.route(message) else {
            return Ok(());
        };
        let session_id = &route.session_id;

        let (transition, card) = {
            let mut store = ctx.store();
            let transition = store.buffer_tool_event(session_id, call_id, update);
            let card = store.tool(session_id, call_id).map(ToolCardView::from);
            (transition, card)
        };

        if let ToolTransition::Rejected(reason) = transition {
            tracing::debug!(
                session_id = %session_id,
                call_id = %call_id,
                reason = ?reason,
                "Ignoring tool update"
            );
            return Ok(());
        }

        if transition.became_terminal() {
            ctx.schedule_eviction(session_id, call_id);
            if let Some(card) = &card {
                ctx.analytics(
                    "tool_finished",
                    Some(session_id),
                    json!({ "tool": card.name, "status": card.status }),
                );
            }
        } else if let ToolTransition::Created(status) = transition {
            tracing::debug!(session_id = %session_id, call_id = %call_id, status = %status, "Tool call detected");
        }

        if route.live {
            if let Some(card) = card {
                ctx.render(RenderRequest::ToolCard {
                    session_id: session_id.clone(),
                    call_id: call_id.clone(),
                    card,
                });
            }
        }
        Ok(())
    }
}

/// Map a tool message onto the store's update vocabulary
fn tool_update(message: &BackendMessage) -> Option<(&CallId, ToolUpdate)> {
    let mapped = match message {
        BackendMessage::FunctionDetected {
            tool_call_id,
            tool_name,
            tool_arguments,
            ..
        } => (
            tool_call_id,
            ToolUpdate::Start {
                name: tool_name.clone(),
                arguments: tool_arguments.clone(),
            },
        ),
        BackendMessage::FunctionArgumentsDelta {
            tool_call_id,
            delta,
            ..
        } => (
            tool_call_id,
            ToolUpdate::ArgumentsDelta {
                delta: delta.clone(),
            },
        ),
        BackendMessage::FunctionArgumentsDone {
            tool_call_id,
            tool_arguments,
            ..
        } => (
            tool_call_id,
            ToolUpdate::ArgumentsDone {
                arguments: tool_arguments.clone(),
            },
        ),
        BackendMessage::FunctionExecuting {
            tool_call_id,
            tool_name,
            tool_arguments,
            ..
        } => (
            tool_call_id,
            ToolUpdate::Executing {
                name: tool_name.clone(),
                arguments: tool_arguments.clone(),
            },
        ),
        BackendMessage::FunctionCompleted {
            tool_call_id,
            tool_success,
            tool_result,
            tool_error,
            interrupted,
            ..
        } => (
            tool_call_id,
            ToolUpdate::End(ToolOutcome::from_completion(
                *tool_success,
                *interrupted,
                tool_result.clone(),
                tool_error.clone(),
            )),
        ),
        _ => return None,
    };
    Some(mapped)
}
