//! Session lifecycle: creation and titles

use super::{HandlerContext, TypeHandler};
use crate::events::{BackendMessage, MessageKind};
use serde_json::json;

pub struct SessionLifecycleHandler;

impl TypeHandler for SessionLifecycleHandler {
    fn name(&self) -> &'static str {
        "session_lifecycle"
    }

    fn kinds(&self) -> &'static [MessageKind] {
        &[MessageKind::SessionCreated, MessageKind::SessionTitle]
    }

    fn handle(&self, message: &BackendMessage, ctx: &HandlerContext) -> anyhow::Result<()> {
        let Some(route) = ctx.route(message) else {
            return Ok(());
        };
        let session_id = &route.session_id;

        match message {
            BackendMessage::SessionCreated { title, .. } => {
                {
                    let mut store = ctx.store();
                    store.ensure(session_id);
                    store.set_title(session_id, title.clone());
                }
                tracing::info!(session_id = %session_id, title = ?title, "Session created");
                ctx.analytics("session_created", Some(session_id), json!({ "live": route.live }));
            }
            BackendMessage::SessionTitle { title, .. } => {
                ctx.store().set_title(session_id, Some(title.clone()));
                tracing::debug!(session_id = %session_id, title = %title, "Session retitled");
            }
            _ => return Ok(()),
        }

        // The session list is visible for every session, active or not
        ctx.session_list_changed(session_id);
        Ok(())
    }
}
