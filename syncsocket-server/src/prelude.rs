//! Prelude module for SyncSocket Server
//!
//! Re-exports the server types and the core types handlers deal with.

pub use crate::config::ServerConfig;
pub use crate::connection::Connection;
pub use crate::handler::{from_fn, EchoHandler, Handler};
pub use crate::server::{Server, ServerBuilder};

pub use syncsocket_core::prelude::*;
