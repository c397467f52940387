//! tether: session-multiplexed streaming core
//!
//! A single backend connection interleaves messages for many chat sessions.
//! This crate routes each message by type, keeps per-session streaming state
//! for every session (visible or not), renders only the active one, and
//! rebuilds a session's view exactly when the user switches to it.
//!
//! ```no_run
//! use std::time::{Duration, Instant};
//! use tether::engine::{Collaborators, Engine, EngineOptions};
//!
//! let engine = Engine::new(EngineOptions::default(), Collaborators::in_memory());
//! engine.deliver(serde_json::json!({
//!     "type": "assistant_delta",
//!     "session_id": "S1",
//!     "content": "Hello",
//! }));
//! engine.tick(Instant::now() + Duration::from_secs(1));
//! ```

pub mod bus;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod events;
pub mod gate;
pub mod handlers;
pub mod logging;
pub mod reconstruct;
pub mod replay;
pub mod router;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
