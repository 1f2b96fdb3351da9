//! Client configuration for SyncSocket
//!
//! This module provides configuration options for the WebSocket client and
//! the worker runtime it owns.

use std::collections::HashMap;
use std::time::Duration;
use syncsocket_core::error::ConfigError;
use syncsocket_core::handshake::HandshakeConfig;
use syncsocket_core::protocol::constants::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use syncsocket_core::transport::TransportConfig;
use syncsocket_core::{Error, Result};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum frame size in bytes
    pub max_frame_size: usize,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Bound on TCP connect plus the opening handshake
    ///
    /// `None` leaves the choice to the caller; a bare client then uses
    /// [`DEFAULT_HANDSHAKE_TIMEOUT`].
    pub handshake_timeout: Option<Duration>,
    /// How long a graceful stop waits for close handshakes to finish
    pub close_timeout: Duration,
    /// Worker threads in the client's runtime
    pub worker_threads: usize,
    /// User agent string
    pub user_agent: String,
    /// Disable Nagle's algorithm on the socket
    pub nodelay: bool,
    /// Headers sent with every upgrade request
    pub headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: None,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            worker_threads: 1,
            user_agent: format!("syncsocket-client/{}", env!("CARGO_PKG_VERSION")),
            nodelay: true,
            headers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
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

        if self.handshake_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::Config(ConfigError::Validation(
                "handshake_timeout must be greater than 0".to_string(),
            )));
        }

        if self.worker_threads == 0 {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "worker_threads".to_string(),
                value: "0".to_string(),
            }));
        }

        Ok(())
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
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Handshake timeout in force for connections of this client
    pub fn effective_handshake_timeout(&self) -> Duration {
        self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT)
    }

    /// Set close timeout
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the number of runtime worker threads
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Add a custom header
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub(crate) fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_frame_size: self.max_frame_size,
            max_message_size: self.max_message_size,
            handshake_timeout: self.effective_handshake_timeout(),
            nodelay: self.nodelay,
        }
    }

    /// Handshake settings; per-connection headers win over configured ones
    pub(crate) fn handshake_config(&self, headers: &HashMap<String, String>) -> HandshakeConfig {
        let mut extra_headers: HashMap<String, String> = self.headers.iter().cloned().collect();
        extra_headers.extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        HandshakeConfig {
            agent: Some(self.user_agent.clone()),
            extra_headers,
        }
    }
}
