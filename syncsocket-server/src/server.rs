//! Echo server
//!
//! [`Server`] accepts TCP connections, performs the opening handshake and
//! hands each upgraded [`Connection`] to its [`Handler`] on a task of its
//! own.

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionLimits};
use crate::handler::{BoxedHandler, Handler};
use crate::manager::ConnectionManager;
use bytes::BytesMut;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use syncsocket_core::error::{ConfigError, FrameError};
use syncsocket_core::handshake::{self, HandshakeRequest, HandshakeResponse};
use syncsocket_core::protocol::constants::MAX_HEADER_SIZE;
use syncsocket_core::{Error, Result, Transport, TransportStream};
use syncsocket_transport_tcp::TcpTransport;

/// WebSocket echo server
pub struct Server {
    config: Arc<ServerConfig>,
    transport: TcpTransport,
    handler: BoxedHandler,
    manager: Arc<ConnectionManager>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Create a server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Bind the listener and prepare to serve `handler`
    pub async fn bind(config: ServerConfig, handler: impl Handler) -> Result<Self> {
        config.validate()?;
        let transport = TcpTransport::bind(config.bind_address, &config.transport_config()).await?;
        tracing::info!(addr = %transport.local_addr()?, "server listening");

        Ok(Self {
            config: Arc::new(config),
            transport,
            handler: Arc::new(handler),
            manager: Arc::new(ConnectionManager::new()),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// The registry of this server's connections
    pub fn manager(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.manager)
    }

    /// Serve until the task is dropped
    pub async fn serve(self) -> Result<()> {
        self.serve_with_graceful_shutdown(std::future::pending()).await
    }

    /// Serve until `signal` completes
    ///
    /// Then stops accepting, sends "going away" to every open connection
    /// and waits up to `shutdown_timeout` for them to finish.
    pub async fn serve_with_graceful_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(stream) => {
                        let config = Arc::clone(&self.config);
                        let handler = Arc::clone(&self.handler);
                        let manager = Arc::clone(&self.manager);
                        tokio::spawn(handle_connection(stream, config, handler, manager));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
            }
        }

        tracing::info!(
            connections = self.manager.connection_count(),
            "shutting down"
        );
        self.manager.shutdown();
        if !self.manager.wait_idle(self.config.shutdown_timeout).await {
            tracing::warn!(
                remaining = self.manager.connection_count(),
                "connections still open after shutdown timeout"
            );
        }
        Ok(())
    }
}

/// Upgrade one accepted stream and run the handler on it
async fn handle_connection<S>(
    mut stream: S,
    config: Arc<ServerConfig>,
    handler: BoxedHandler,
    manager: Arc<ConnectionManager>,
) where
    S: TransportStream + 'static,
{
    let remote_addr = match stream.remote_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::debug!(error = %e, "dropping stream without peer address");
            return;
        }
    };

    let upgrade = tokio::time::timeout(config.handshake_timeout, read_upgrade(&mut stream)).await;
    let (request, leftover) = match upgrade {
        Ok(Ok(upgrade)) => upgrade,
        Ok(Err(e)) => {
            tracing::debug!(%remote_addr, error = %e, "rejecting upgrade request");
            reject(&mut stream, handshake::bad_request()).await;
            return;
        }
        Err(_) => {
            tracing::debug!(%remote_addr, "handshake timed out");
            let _ = stream.close().await;
            return;
        }
    };

    let Some((guard, shutdown)) = manager.register(remote_addr, config.max_connections) else {
        reject(&mut stream, handshake::service_unavailable()).await;
        return;
    };

    let response = match handshake::create_server_handshake(&request, &config.handshake_config()) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(%remote_addr, error = %e, "cannot answer upgrade request");
            reject(&mut stream, handshake::bad_request()).await;
            return;
        }
    };
    if let Err(e) = write_response(&mut stream, &response).await {
        tracing::debug!(%remote_addr, error = %e, "failed to send handshake response");
        return;
    }

    let id = guard.id();
    tracing::debug!(id, %remote_addr, resource = %request.uri, "connection upgraded");
    let limits = ConnectionLimits {
        max_frame_size: config.max_frame_size,
        max_message_size: config.max_message_size,
        close_timeout: config.shutdown_timeout,
    };
    let connection = Connection::new(id, remote_addr, Box::new(stream), leftover, limits, shutdown);

    if let Err(e) = handler.handle(connection).await {
        tracing::debug!(id, error = %e, "handler finished with error");
    }
    drop(guard);
}

/// Read and validate the upgrade request; returns bytes that followed it
async fn read_upgrade<S: TransportStream>(stream: &mut S) -> Result<(HandshakeRequest, BytesMut)> {
    let mut buf = BytesMut::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Connection(
                "connection closed during handshake".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((request, consumed)) = handshake::parse_client_handshake(&buf)? {
            handshake::validate_client_handshake(&request)?;
            let _ = buf.split_to(consumed);
            return Ok((request, buf));
        }

        if buf.len() > MAX_HEADER_SIZE {
            return Err(FrameError::TooLarge {
                size: buf.len(),
                max: MAX_HEADER_SIZE,
            }
            .into());
        }
    }
}

async fn write_response<S: TransportStream>(stream: &mut S, response: &HandshakeResponse) -> Result<()> {
    stream
        .write_all(handshake::response_to_string(response).as_bytes())
        .await?;
    stream.flush().await
}

async fn reject<S: TransportStream>(stream: &mut S, response: HandshakeResponse) {
    if let Err(e) = write_response(stream, &response).await {
        tracing::debug!(error = %e, "failed to send rejection");
    }
    let _ = stream.close().await;
}

/// Server builder
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address
    pub fn bind(mut self, addr: &str) -> Result<Self> {
        self.config.bind_address = addr.parse().map_err(|_| {
            Error::Config(ConfigError::InvalidValue {
                field: "bind_address".to_string(),
                value: addr.to_string(),
            })
        })?;
        Ok(self)
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Bind a server for `handler`
    pub async fn build_with_handler(self, handler: impl Handler) -> Result<Server> {
        Server::bind(self.config, handler).await
    }
}
