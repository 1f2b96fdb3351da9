//! Connection event callbacks
//!
//! A [`SessionListener`] receives every event of one connection. Callbacks
//! run on the client's runtime worker threads and must not block for long;
//! they are invoked in wire order (open, then frames and messages, then
//! close) for a single connection.

use crate::session::Session;
use syncsocket_core::{Error, Frame};

/// Receives the events of one client connection
pub trait SessionListener: Send + Sync + 'static {
    /// The opening handshake succeeded
    fn on_open(&self, session: Session);

    /// A data frame arrived, before it is assembled into a message
    fn on_frame(&self, _frame: &Frame) {}

    /// A complete text message arrived
    fn on_text(&self, _text: &str) {}

    /// A complete binary message arrived
    fn on_binary(&self, _data: &[u8]) {}

    /// The connection is closed; `remote` is true when the peer or the
    /// network ended it
    fn on_close(&self, code: u16, reason: &str, remote: bool);

    /// A transport or protocol failure; a connection that was open also
    /// receives `on_close` afterwards
    fn on_error(&self, _error: &Error) {}
}
