//! Server configuration
//!
//! This module provides configuration options for the echo server.

use std::net::SocketAddr;
use std::time::Duration;
use syncsocket_core::error::ConfigError;
use syncsocket_core::handshake::HandshakeConfig;
use syncsocket_core::protocol::constants::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use syncsocket_core::transport::TransportConfig;
use syncsocket_core::{Error, Result};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: SocketAddr,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum frame size in bytes
    pub max_frame_size: usize,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Handshake timeout
    pub handshake_timeout: Duration,
    /// How long a graceful shutdown waits for connections to drain
    pub shutdown_timeout: Duration,
    /// Value of the `Server` response header
    pub server_name: String,
    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_connections: 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            shutdown_timeout: DEFAULT_CLOSE_TIMEOUT,
            server_name: format!("syncsocket-server/{}", env!("CARGO_PKG_VERSION")),
            nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "max_connections".to_string(),
                value: "0".to_string(),
            }));
        }

        if self.max_frame_size == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "max_frame_size must be greater than 0".to_string(),
            )));
        }

        if self.max_message_size < self.max_frame_size {
            return Err(Error::Config(ConfigError::Validation(
                "max_message_size must be greater than or equal to max_frame_size".to_string(),
            )));
        }

        if self.handshake_timeout.is_zero() {
            return Err(Error::Config(ConfigError::Validation(
                "handshake_timeout must be greater than 0".to_string(),
            )));
        }

        Ok(())
    }

    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the `Server` header value
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub(crate) fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_frame_size: self.max_frame_size,
            max_message_size: self.max_message_size,
            handshake_timeout: self.handshake_timeout,
            nodelay: self.nodelay,
        }
    }

    pub(crate) fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            agent: Some(self.server_name.clone()),
            ..Default::default()
        }
    }
}
