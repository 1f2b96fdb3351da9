//! # SyncSocket Core
//!
//! Core WebSocket protocol implementation shared by the SyncSocket client,
//! server and facade crates. It includes:
//!
//! - Error handling and types
//! - WebSocket frame parsing and generation
//! - Message handling and fragment assembly
//! - Opening handshake for both peers
//! - Protocol constants and utilities
//! - Transport layer abstractions

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod protocol;
pub mod transport;

pub mod prelude;

pub use error::{CloseCode, Error, Result};
pub use frame::{Frame, FrameKind, FrameParser};
pub use handshake::{ClientTarget, HandshakeConfig, HandshakeRequest, HandshakeResponse};
pub use message::{CloseFrame, Message, MessageAssembler, MessageKind};
pub use protocol::Opcode;
pub use transport::{Transport, TransportConfig, TransportStream};
