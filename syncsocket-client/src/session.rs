//! Blocking handle to an open client connection

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use syncsocket_core::{Error, Message, Result};
use tokio::sync::{mpsc, oneshot};

/// Outbound side of a connection as seen by a [`Session`]
pub trait SessionSink: Send + Sync + 'static {
    /// Queue a message and wait until it is written
    fn send(&self, message: Message) -> Result<()>;

    /// Ask for a graceful close; never blocks
    fn close(&self, code: u16, reason: &str);

    /// Whether the connection still accepts messages
    fn is_open(&self) -> bool;
}

/// Handle to one open connection
///
/// Cloning is cheap; all clones drive the same connection. Sends block the
/// calling thread until the frame is written, so they must not be issued
/// from inside the client's runtime.
#[derive(Clone)]
pub struct Session {
    id: u64,
    remote_addr: SocketAddr,
    sink: Arc<dyn SessionSink>,
}

impl Session {
    /// Wrap a sink as a session
    pub fn new(id: u64, remote_addr: SocketAddr, sink: Arc<dyn SessionSink>) -> Self {
        Self {
            id,
            remote_addr,
            sink,
        }
    }

    /// Connection id, unique per client
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Send a text message
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.sink.send(Message::text(text))
    }

    /// Send a binary message
    pub fn send_binary(&self, data: impl Into<bytes::Bytes>) -> Result<()> {
        self.sink.send(Message::binary(data))
    }

    /// Start the closing handshake
    pub fn close(&self, code: u16, reason: &str) {
        self.sink.close(code, reason)
    }

    /// Whether the connection still accepts messages
    pub fn is_open(&self) -> bool {
        self.sink.is_open()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Command sent from a session to its connection task
#[derive(Debug)]
pub(crate) enum Command {
    Send {
        message: Message,
        ack: oneshot::Sender<Result<()>>,
    },
    Close {
        code: u16,
        reason: String,
    },
}

/// Sink backed by the connection task's command channel
#[derive(Debug)]
pub(crate) struct ChannelSink {
    commands: mpsc::UnboundedSender<Command>,
    open: Arc<AtomicBool>,
}

impl ChannelSink {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>, open: Arc<AtomicBool>) -> Self {
        Self { commands, open }
    }
}

impl SessionSink for ChannelSink {
    fn send(&self, message: Message) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::Other(
                "blocking send called from inside an async runtime".to_string(),
            ));
        }
        if !self.is_open() {
            return Err(Error::Connection("session is not open".to_string()));
        }

        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Send { message, ack })
            .map_err(|_| Error::Connection("connection task has stopped".to_string()))?;
        done.blocking_recv()
            .map_err(|_| Error::Connection("connection closed before the send completed".to_string()))?
    }

    fn close(&self, code: u16, reason: &str) {
        // The task may already be gone; there is nothing left to close then
        let _ = self.commands.send(Command::Close {
            code,
            reason: reason.to_string(),
        });
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Recording sink for tests
#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// Records what a session was asked to do
    #[derive(Debug, Default)]
    pub struct MockSink {
        sent: Mutex<Vec<Message>>,
        closes: Mutex<Vec<(u16, String)>>,
        fail_sends: AtomicBool,
        closed: AtomicBool,
    }

    impl MockSink {
        /// Messages sent so far
        pub fn sent(&self) -> Vec<Message> {
            self.sent.lock().clone()
        }

        /// Close requests so far
        pub fn closes(&self) -> Vec<(u16, String)> {
            self.closes.lock().clone()
        }

        /// Make every following send fail
        pub fn fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }
    }

    impl SessionSink for MockSink {
        fn send(&self, message: Message) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(Error::Connection("mock send failure".to_string()));
            }
            self.sent.lock().push(message);
            Ok(())
        }

        fn close(&self, code: u16, reason: &str) {
            self.closed.store(true, Ordering::SeqCst);
            self.closes.lock().push((code, reason.to_string()));
        }

        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
    }

    impl Session {
        /// A session backed by a [`MockSink`]
        pub fn mock() -> (Session, Arc<MockSink>) {
            let sink = Arc::new(MockSink::default());
            let session = Session::new(0, ([127, 0, 0, 1], 0).into(), sink.clone());
            (session, sink)
        }
    }
}
