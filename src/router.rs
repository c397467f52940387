//! Message router
//!
//! Expands the single inbound channel into one typed topic per message
//! kind, so each handler can subscribe narrowly:
//!
//! ```text
//! backend:message ──decode──▶ message:assistant_delta
//!                          ├─▶ message:function_completed
//!                          └─▶ ...
//! ```

use crate::bus::{EventBus, ListenerHandle, Payload, Topic};
use crate::events::{AnalyticsEvent, BackendMessage, MessageKind};

const INSTALL_KEY: &str = "router";

/// Subscribe the router to the inbound topic
///
/// Installing twice on the same bus would double-dispatch every message,
/// so the second call returns `None` and registers nothing.
pub fn register_type_routing(bus: &EventBus) -> Option<ListenerHandle> {
    if !bus.install_once(INSTALL_KEY) {
        tracing::debug!("Type routing already installed, skipping");
        return None;
    }

    let weak = bus.downgrade();
    let handle = bus.on(Topic::Inbound, move |envelope| {
        let Payload::Inbound(value) = &envelope.data else {
            return Ok(());
        };
        let Some(bus) = weak.upgrade() else {
            return Ok(());
        };

        match BackendMessage::decode(value) {
            Ok(message) => {
                let kind = message.kind();
                if kind == MessageKind::Unknown {
                    tracing::debug!(message = ?message, "Routing message of unknown type");
                }
                bus.emit_from("router", Topic::Message(kind), Payload::Message(message));
            }
            Err(error) => {
                tracing::warn!(error = %error, "Dropping undecodable backend message");
                bus.emit_from(
                    "router",
                    Topic::Analytics,
                    Payload::Analytics(AnalyticsEvent {
                        name: "message_decode_failed",
                        session_id: None,
                        properties: serde_json::json!({ "error": error.to_string() }),
                    }),
                );
            }
        }
        Ok(())
    });
    Some(handle)
}
