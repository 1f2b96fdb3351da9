//! SyncSocket
//!
//! Blocking request/response conversations over WebSocket. A [`Request`]
//! opens a connection, sends one payload, waits until a reply satisfies
//! its completion condition and hands back a [`Response`] holding the last
//! payload received and the close status.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use syncsocket::prelude::*;
//!
//! fn main() -> syncsocket::Result<()> {
//!     syncsocket::logging::init_logging().ok();
//!
//!     let response = Request::new("ws://127.0.0.1:9001/echo")
//!         .bytes("hello")
//!         .timeout(10)
//!         .execute()?;
//!
//!     assert_eq!(response.status(), 1000);
//!     println!("{}", response.text().unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! Execution blocks the calling thread; call it from ordinary threads, not
//! from inside an async runtime.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

mod bridge;
pub mod gate;
pub mod logging;
pub mod query;
pub mod request;
pub mod response;

pub mod prelude;

pub use query::{append_query, query_string};
pub use request::{normalize_timeout, Request, DEFAULT_TIMEOUT_SECS};
pub use response::Response;

pub use syncsocket_client::ClientConfig;
pub use syncsocket_core::error::{self, TimeoutError};
pub use syncsocket_core::{CloseCode, Error, Result};

/// The callback-driven client underneath [`Request`]
pub use syncsocket_client as client;
