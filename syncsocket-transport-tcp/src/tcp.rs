//! TCP transport implementation for SyncSocket

use async_trait::async_trait;
use std::net::SocketAddr;
use syncsocket_core::{
    transport::{Transport, TransportConfig, TransportStream},
    Error, Result,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream as TokioTcpStream, ToSocketAddrs};

/// Bound TCP listener
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    nodelay: bool,
}

impl TcpTransport {
    /// Bind a listener to the given address
    pub async fn bind(addr: SocketAddr, config: &TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
        let local_addr = listener.local_addr().map_err(Error::Io)?;
        tracing::debug!(%local_addr, "tcp listener bound");

        Ok(Self {
            listener,
            local_addr,
            nodelay: config.nodelay,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<Self::Stream> {
        let (stream, remote_addr) = self.listener.accept().await.map_err(Error::Io)?;
        if self.nodelay {
            stream.set_nodelay(true).map_err(Error::Io)?;
        }
        Ok(TcpStream::with_remote(stream, remote_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

/// TCP stream implementation
#[derive(Debug)]
pub struct TcpStream {
    stream: TokioTcpStream,
    remote_addr: SocketAddr,
}

impl TcpStream {
    /// Wrap an already connected tokio stream
    pub fn from_tokio(stream: TokioTcpStream) -> Result<Self> {
        let remote_addr = stream.peer_addr().map_err(Error::Io)?;
        Ok(Self::with_remote(stream, remote_addr))
    }

    fn with_remote(stream: TokioTcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            stream,
            remote_addr,
        }
    }

    /// Connect to a remote address, resolving host names as needed
    pub async fn connect<A: ToSocketAddrs>(addr: A, config: &TransportConfig) -> Result<Self> {
        let stream = TokioTcpStream::connect(addr).await.map_err(|e| {
            Error::Connection(format!("tcp connect failed: {}", e))
        })?;
        if config.nodelay {
            stream.set_nodelay(true).map_err(Error::Io)?;
        }
        Self::from_tokio(stream)
    }
}

#[async_trait]
impl TransportStream for TcpStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).await.map_err(Error::Io)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf).await.map_err(Error::Io)
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await.map_err(Error::Io)
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(Error::Io)
    }

    fn remote_addr(&self) -> Result<SocketAddr> {
        Ok(self.remote_addr)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.stream.local_addr().map_err(Error::Io)
    }
}
