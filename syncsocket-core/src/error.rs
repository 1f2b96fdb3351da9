//! Error types for SyncSocket
//!
//! This module defines all error types used throughout the SyncSocket crates.
//! Transport failures, protocol violations and the blocking bridge's own
//! timeouts all funnel into the single [`Error`] enum.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for SyncSocket operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for SyncSocket operations
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Frame errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Message errors
    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(#[from] TimeoutError),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),

    /// Invalid UTF-8 in text frame
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,
}

// `std::io::Error` is not `Clone`; copies keep its kind and message
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Protocol(e) => Error::Protocol(e.clone()),
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::Config(e) => Error::Config(e.clone()),
            Error::Frame(e) => Error::Frame(e.clone()),
            Error::Message(e) => Error::Message(e.clone()),
            Error::Timeout(e) => Error::Timeout(e.clone()),
            Error::Connection(msg) => Error::Connection(msg.clone()),
            Error::Other(msg) => Error::Other(msg.clone()),
            Error::InvalidUtf8 => Error::InvalidUtf8,
        }
    }
}

impl Error {
    /// Whether this error is one of the timeout kinds
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// WebSocket protocol specific errors
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Invalid upgrade request
    #[error("Invalid WebSocket upgrade request")]
    InvalidUpgradeRequest,

    /// Missing required headers
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// Invalid header value
    #[error("Invalid header value for {header}: {value}")]
    InvalidHeader { header: String, value: String },

    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Invalid format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Target address could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Scheme other than `ws`
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Unexpected HTTP status
    #[error("Unexpected HTTP status: {0}")]
    UnexpectedStatus(u16),

    /// Invalid accept key
    #[error("Invalid WebSocket accept key - expected: {expected}, received: {received}")]
    InvalidAcceptKey { expected: String, received: String },
}

/// Frame parsing and processing errors
#[derive(Error, Debug, Clone)]
pub enum FrameError {
    /// Insufficient data to parse frame
    #[error("Insufficient data: need {needed} bytes, have {have}")]
    InsufficientData { needed: usize, have: usize },

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// Invalid frame header
    #[error("Invalid frame header: {0}")]
    InvalidHeader(String),

    /// Invalid opcode
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Reserved bits set
    #[error("Reserved bits set in frame")]
    ReservedBitsSet,

    /// Control frames cannot be fragmented
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Message errors
#[derive(Error, Debug, Clone)]
pub enum MessageError {
    /// Message too large
    #[error("Message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Incomplete message
    #[error("Incomplete message: missing {missing}")]
    Incomplete { missing: String },
}

/// Timeout errors
#[derive(Error, Debug, Clone)]
pub enum TimeoutError {
    /// Opening handshake did not finish in time
    #[error("Handshake timeout: {timeout:?}")]
    Handshake { timeout: Duration },

    /// The conversation was never reported open
    #[error("Open timeout: {timeout:?}")]
    Open { timeout: Duration },
}

/// WebSocket close codes as defined in RFC 6455
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Normal closure
    Normal,
    /// Going away
    Away,
    /// Protocol error
    ProtocolError,
    /// Unsupported data
    Unsupported,
    /// No status received
    NoStatus,
    /// Abnormal closure
    Abnormal,
    /// Invalid frame payload data
    InvalidPayload,
    /// Policy violation
    PolicyViolation,
    /// Message too big
    TooBig,
    /// Mandatory extension
    MandatoryExtension,
    /// Internal server error
    Internal,
    /// TLS handshake failure
    TlsHandshake,
    /// Application-specific close code (3000-4999)
    Application(u16),
}

impl CloseCode {
    /// Create a CloseCode from a u16
    pub fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::Internal,
            1015 => CloseCode::TlsHandshake,
            code if (3000..=4999).contains(&code) => CloseCode::Application(code),
            _ => CloseCode::ProtocolError,
        }
    }

    /// Get the numeric value of the close code
    pub fn code(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::Internal => 1011,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Application(code) => *code,
        }
    }

    /// Codes that must never appear on the wire
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            CloseCode::NoStatus | CloseCode::Abnormal | CloseCode::TlsHandshake
        )
    }

    /// Check if this close code indicates an error
    pub fn is_error(&self) -> bool {
        !matches!(self, CloseCode::Normal | CloseCode::Away)
    }

    /// Whether `code` may be put in a close frame
    pub fn is_sendable(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.code()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_clone_keeps_io_kind() {
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        match err.clone() {
            Error::Io(copy) => {
                assert_eq!(copy.kind(), std::io::ErrorKind::ConnectionRefused);
                assert!(copy.to_string().contains("refused"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = Error::Timeout(TimeoutError::Open {
            timeout: Duration::from_secs(1),
        });
        assert!(err.clone().is_timeout());
    }

    #[test]
    fn test_close_code_conversion() {
        assert_eq!(CloseCode::from(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from(4000), CloseCode::Application(4000));
        assert_eq!(CloseCode::from(999), CloseCode::ProtocolError);
        assert_eq!(u16::from(CloseCode::Abnormal), 1006);
        assert!(CloseCode::NoStatus.is_reserved());
        assert!(!CloseCode::Away.is_error());
    }

    #[test]
    fn test_sendable_close_codes() {
        assert!(CloseCode::is_sendable(1000));
        assert!(CloseCode::is_sendable(4000));
        assert!(!CloseCode::is_sendable(1005));
        assert!(!CloseCode::is_sendable(1015));
        assert!(!CloseCode::is_sendable(999));
        assert!(!CloseCode::is_sendable(5000));
    }

    #[test]
    fn test_close_code_display() {
        assert_eq!(CloseCode::Normal.to_string(), "Normal (1000)");
    }

    #[test]
    fn test_error_display() {
        let err = Error::Timeout(TimeoutError::Open {
            timeout: Duration::from_secs(3),
        });
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Timeout error: Open timeout: 3s");

        let err = Error::Protocol(ProtocolError::UnsupportedScheme("wss".into()));
        assert!(err.to_string().contains("wss"));
    }
}
