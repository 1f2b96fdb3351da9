//! SyncSocket Client
//!
//! A callback-driven WebSocket client. A [`WebSocketClient`] owns a worker
//! runtime; every connection it opens reports its events to a
//! [`SessionListener`] and is driven through a blocking [`Session`] handle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use syncsocket_client::prelude::*;
//!
//! struct Printer;
//!
//! impl SessionListener for Printer {
//!     fn on_open(&self, session: Session) {
//!         println!("connected to {}", session.remote_addr());
//!     }
//!     fn on_text(&self, text: &str) {
//!         println!("received: {}", text);
//!     }
//!     fn on_close(&self, code: u16, reason: &str, _remote: bool) {
//!         println!("closed: {} {}", code, reason);
//!     }
//! }
//!
//! # fn main() -> syncsocket_core::Result<()> {
//! let client = WebSocketClient::new(ClientConfig::default())?;
//! client.connect("ws://127.0.0.1:9001/", &HashMap::new(), Arc::new(Printer))?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! client.stop();
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod connection;
pub mod listener;
pub mod session;

pub mod prelude;

pub use client::WebSocketClient;
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use listener::SessionListener;
pub use session::{Session, SessionSink};
