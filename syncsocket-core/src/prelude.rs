//! Prelude module for SyncSocket Core
//!
//! Re-exports the types most code touching the protocol needs.

pub use crate::error::{CloseCode, Error, Result};
pub use crate::frame::{Frame, FrameKind, FrameParser};
pub use crate::message::{CloseFrame, Message, MessageAssembler, MessageKind};
pub use crate::protocol::Opcode;
pub use crate::transport::{Transport, TransportConfig, TransportStream};

pub use bytes::{Bytes, BytesMut};
