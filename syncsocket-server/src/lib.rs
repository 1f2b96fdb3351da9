//! SyncSocket Server
//!
//! A small WebSocket server used as the reference peer for the SyncSocket
//! clients. Its default [`EchoHandler`] returns binary messages unchanged
//! and text messages with a fixed prefix.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use syncsocket_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> syncsocket_core::Result<()> {
//!     let server = Server::builder()
//!         .bind("127.0.0.1:9001")?
//!         .max_connections(64)
//!         .build_with_handler(EchoHandler)
//!         .await?;
//!
//!     server.serve().await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod config;
pub mod connection;
pub mod handler;
pub mod manager;
pub mod server;

pub mod prelude;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionMetadata, ConnectionState};
pub use handler::{from_fn, BoxedHandler, EchoHandler, FnHandler, Handler, TEXT_REPLY_PREFIX};
pub use manager::{ConnectionGuard, ConnectionInfo, ConnectionManager, ManagerStats};
pub use server::{Server, ServerBuilder};
