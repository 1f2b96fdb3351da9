//! Connection handlers
//!
//! A [`Handler`] drives one upgraded connection from the first message to
//! the close. [`EchoHandler`] is the reference peer the client crates are
//! tested against; [`from_fn`] turns a closure into a handler for one-off
//! behaviors.

use crate::connection::Connection;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use syncsocket_core::{Message, Result};

/// Prefix the echo handler puts in front of every text reply
pub const TEXT_REPLY_PREFIX: &str = "server to convert text:";

/// Serves one upgraded connection
pub trait Handler: Send + Sync + 'static {
    /// Handle the connection until it closes
    fn handle<'a>(
        &'a self,
        connection: Connection,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Shared handler, as held by the server
pub type BoxedHandler = Arc<dyn Handler>;

/// Replies to every data message
///
/// Binary messages come back unchanged, text messages come back with
/// [`TEXT_REPLY_PREFIX`] prepended, and a close is answered with the
/// peer's code.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl EchoHandler {
    /// Create a new echo handler
    pub fn new() -> Self {
        Self
    }
}

impl Handler for EchoHandler {
    fn handle<'a>(
        &'a self,
        mut connection: Connection,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            while let Some(message) = connection.next().await? {
                match message {
                    Message::Text(text) => {
                        tracing::trace!(id = connection.id(), len = text.len(), "echoing text");
                        connection
                            .send_text(format!("{}{}", TEXT_REPLY_PREFIX, text))
                            .await?;
                    }
                    Message::Binary(data) => {
                        tracing::trace!(id = connection.id(), len = data.len(), "echoing binary");
                        connection.send_binary(data).await?;
                    }
                    Message::Close(frame) => {
                        connection.close(frame.map(|f| f.code), None).await?;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            Ok(())
        })
    }
}

/// Handler built from a closure, see [`from_fn`]
pub struct FnHandler<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle<'a>(
        &'a self,
        connection: Connection,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin((self.f)(connection))
    }
}

/// Create a handler from an async closure
pub fn from_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler { f }
}
