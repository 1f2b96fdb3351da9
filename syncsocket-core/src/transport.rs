//! Transport layer abstraction
//!
//! Connections are driven over any [`TransportStream`]; the TCP crate
//! provides the production implementation and [`mock`] provides an
//! in-memory pair for tests.

use crate::error::Result;
use crate::protocol::constants::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE,
};
use std::net::SocketAddr;
use std::time::Duration;

/// Listener side of a transport
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: TransportStream;

    /// Accept an incoming connection
    async fn accept(&self) -> Result<Self::Stream>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Byte stream a WebSocket connection runs over
///
/// `read` must be cancel-safe: connection loops race it against outbound
/// commands and drop the losing future.
#[async_trait::async_trait]
pub trait TransportStream: Send + Sync {
    /// Read data from the stream; `Ok(0)` means end of stream
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all data to the stream
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Flush the stream
    async fn flush(&mut self) -> Result<()>;

    /// Shut down the write half
    async fn close(&mut self) -> Result<()>;

    /// Get the remote address
    fn remote_addr(&self) -> Result<SocketAddr>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Configuration for transport options
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum frame size
    pub max_frame_size: usize,
    /// Maximum message size
    pub max_message_size: usize,
    /// Handshake timeout
    pub handshake_timeout: Duration,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            nodelay: true,
        }
    }
}

/// In-memory transport streams for tests
#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use super::*;
    use crate::error::Error;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// One end of an in-memory duplex pipe
    #[derive(Debug)]
    pub struct MockStream {
        inner: DuplexStream,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    }

    /// Create a connected pair of streams
    pub fn pair() -> (MockStream, MockStream) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client: SocketAddr = ([127, 0, 0, 1], 50000).into();
        let server: SocketAddr = ([127, 0, 0, 1], 9000).into();
        (
            MockStream {
                inner: a,
                local_addr: client,
                remote_addr: server,
            },
            MockStream {
                inner: b,
                local_addr: server,
                remote_addr: client,
            },
        )
    }

    #[async_trait::async_trait]
    impl TransportStream for MockStream {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.inner.read(buf).await.map_err(Error::Io)
        }

        async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            self.inner.write_all(buf).await.map_err(Error::Io)
        }

        async fn flush(&mut self) -> Result<()> {
            self.inner.flush().await.map_err(Error::Io)
        }

        async fn close(&mut self) -> Result<()> {
            self.inner.shutdown().await.map_err(Error::Io)
        }

        fn remote_addr(&self) -> Result<SocketAddr> {
            Ok(self.remote_addr)
        }

        fn local_addr(&self) -> Result<SocketAddr> {
            Ok(self.local_addr)
        }
    }
}
