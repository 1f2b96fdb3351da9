//! Message handling for SyncSocket
//!
//! This module provides the message model delivered to listeners and
//! handlers, plus the assembler that joins fragmented data frames.

use crate::error::{CloseCode, Error, MessageError, Result};
use crate::frame::Frame;
use crate::protocol::{constants::DEFAULT_MAX_MESSAGE_SIZE, Opcode};
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Represents a complete WebSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message
    Text(String),
    /// Binary message
    Binary(Bytes),
    /// Ping message
    Ping(Bytes),
    /// Pong message
    Pong(Bytes),
    /// Close message; `None` when the peer sent no status
    Close(Option<CloseFrame>),
}

/// Code and reason carried by a close message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code
    pub code: u16,
    /// Close reason
    pub reason: String,
}

impl CloseFrame {
    /// The code as a [`CloseCode`]
    pub fn close_code(&self) -> CloseCode {
        CloseCode::from(self.code)
    }
}

impl Message {
    /// Create a text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a binary message
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Create a close message
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }))
    }

    /// Get the message kind
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Text(_) => MessageKind::Text,
            Message::Binary(_) => MessageKind::Binary,
            Message::Ping(_) => MessageKind::Ping,
            Message::Pong(_) => MessageKind::Pong,
            Message::Close(_) => MessageKind::Close,
        }
    }

    /// Check if this is a control message
    pub fn is_control(&self) -> bool {
        matches!(self, Message::Ping(_) | Message::Pong(_) | Message::Close(_))
    }

    /// Check if this is a data message
    pub fn is_data(&self) -> bool {
        matches!(self, Message::Text(_) | Message::Binary(_))
    }

    /// Get the message payload as text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Get the message payload as bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data,
            Message::Close(Some(close)) => close.reason.as_bytes(),
            Message::Close(None) => &[],
        }
    }

    /// Convert message to a single unmasked frame
    pub fn to_frame(&self) -> Frame {
        match self {
            Message::Text(text) => Frame::text(Bytes::copy_from_slice(text.as_bytes())),
            Message::Binary(data) => Frame::binary(data.clone()),
            Message::Ping(data) => Frame::ping(data.clone()),
            Message::Pong(data) => Frame::pong(data.clone()),
            Message::Close(Some(close)) => Frame::close(Some(close.code), Some(&close.reason)),
            Message::Close(None) => Frame::close(None, None),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(text) => write!(f, "Text({})", text),
            Message::Binary(data) => write!(f, "Binary({} bytes)", data.len()),
            Message::Ping(data) => write!(f, "Ping({} bytes)", data.len()),
            Message::Pong(data) => write!(f, "Pong({} bytes)", data.len()),
            Message::Close(Some(close)) => write!(f, "Close({}, {})", close.code, close.reason),
            Message::Close(None) => write!(f, "Close"),
        }
    }
}

/// Message kind for easier matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Text message
    Text,
    /// Binary message
    Binary,
    /// Ping message
    Ping,
    /// Pong message
    Pong,
    /// Close message
    Close,
}

/// Joins fragmented data frames into messages
///
/// Control frames pass straight through, even in the middle of a
/// fragmented message.
#[derive(Debug)]
pub struct MessageAssembler {
    opcode: Option<Opcode>,
    buffer: BytesMut,
    max_message_size: usize,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageAssembler {
    /// Create a new message assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler that rejects messages above `max_message_size`
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            opcode: None,
            buffer: BytesMut::new(),
            max_message_size,
        }
    }

    /// Feed a frame; returns a message once one is complete
    pub fn feed_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.is_control() {
            return control_frame_to_message(frame).map(Some);
        }

        match (frame.opcode, self.opcode) {
            (Opcode::Continuation, None) => {
                return Err(MessageError::InvalidFormat(
                    "continuation frame without a preceding data frame".into(),
                )
                .into());
            }
            (Opcode::Continuation, Some(_)) => {}
            (opcode, None) => {
                if frame.fin {
                    self.check_size(frame.payload.len())?;
                    return data_message(opcode, frame.payload).map(Some);
                }
                self.opcode = Some(opcode);
            }
            (_, Some(_)) => {
                self.reset();
                return Err(MessageError::Incomplete {
                    missing: "continuation frame".into(),
                }
                .into());
            }
        }

        if let Err(e) = self.check_size(self.buffer.len() + frame.payload.len()) {
            self.reset();
            return Err(e);
        }
        self.buffer.extend_from_slice(&frame.payload);

        if !frame.fin {
            return Ok(None);
        }

        let opcode = self.opcode.take().unwrap_or(Opcode::Binary);
        let payload = self.buffer.split().freeze();
        data_message(opcode, payload).map(Some)
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            return Err(MessageError::TooLarge {
                size,
                max: self.max_message_size,
            }
            .into());
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.opcode = None;
        self.buffer.clear();
    }

    /// Check if a fragmented message is in progress
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Get the number of buffered payload bytes
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }
}

fn data_message(opcode: Opcode, payload: Bytes) -> Result<Message> {
    match opcode {
        Opcode::Text => String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| Error::InvalidUtf8),
        _ => Ok(Message::Binary(payload)),
    }
}

fn control_frame_to_message(frame: Frame) -> Result<Message> {
    match frame.opcode {
        Opcode::Ping => Ok(Message::Ping(frame.payload)),
        Opcode::Pong => Ok(Message::Pong(frame.payload)),
        _ => {
            let close = frame
                .close_payload()?
                .map(|(code, reason)| CloseFrame { code, reason });
            Ok(Message::Close(close))
        }
    }
}
