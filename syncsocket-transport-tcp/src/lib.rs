//! TCP Transport for SyncSocket
//!
//! Plain TCP streams for `ws://` connections: outbound connects for the
//! client and a bound listener for the server.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod tcp;

pub use tcp::{TcpStream, TcpTransport};

/// Prelude module
pub mod prelude {
    pub use crate::tcp::{TcpStream, TcpTransport};
    pub use syncsocket_core::transport::{Transport, TransportStream};
}
