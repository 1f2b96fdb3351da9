//! Prelude module for SyncSocket Client
//!
//! Re-exports the client types and the core types listeners deal with.

pub use crate::client::WebSocketClient;
pub use crate::config::ClientConfig;
pub use crate::listener::SessionListener;
pub use crate::session::Session;

pub use syncsocket_core::prelude::*;

pub use std::time::Duration;
