//! WebSocket frame parsing and serialization
//!
//! This module provides frame parsing and serialization following RFC 6455.
//! Client-originated frames are masked, server-originated frames are not;
//! the codec itself handles both directions.

use crate::{
    error::{Error, FrameError, Result},
    protocol::{bits::*, constants::DEFAULT_MAX_FRAME_SIZE, Opcode},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Represents a WebSocket frame according to RFC 6455
#[derive(Debug, Clone)]
pub struct Frame {
    /// Indicates if this is the final frame in a message
    pub fin: bool,
    /// Reserved bits (RSV1, RSV2, RSV3)
    pub rsv: [bool; 3],
    /// Frame opcode
    pub opcode: Opcode,
    /// Indicates if the payload is masked on the wire
    pub masked: bool,
    /// Masking key (if present)
    pub mask: Option<[u8; 4]>,
    /// Payload data, always held unmasked
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with the given opcode and payload
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            rsv: [false; 3],
            opcode,
            masked: false,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Create a continuation frame
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Continuation, payload)
    }

    /// Create a text frame
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    /// Create a binary frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// Create a close frame with optional code and reason
    ///
    /// A reason without a code is dropped, as RFC 6455 requires the code
    /// to come first.
    pub fn close(code: Option<u16>, reason: Option<&str>) -> Self {
        let mut payload = BytesMut::new();

        if let Some(code) = code {
            payload.put_u16(code);
            if let Some(reason) = reason {
                payload.put_slice(truncate_reason(reason).as_bytes());
            }
        }

        Self::new(Opcode::Close, payload.freeze())
    }

    /// Create a ping frame
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// Create a pong frame
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Set the FIN bit
    pub fn fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Mark the frame for masking with a fresh random key
    pub fn mask(mut self, enabled: bool) -> Self {
        if enabled {
            self.masked = true;
            self.mask = Some(rand::random::<[u8; 4]>());
        } else {
            self.masked = false;
            self.mask = None;
        }
        self
    }

    /// Serialize the frame to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 14);
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Write the frame to a buffer
    pub fn write_to(&self, buf: &mut BytesMut) {
        let first_byte = ((self.fin as u8) << 7)
            | ((self.rsv[0] as u8) << 6)
            | ((self.rsv[1] as u8) << 5)
            | ((self.rsv[2] as u8) << 4)
            | self.opcode.value();
        buf.put_u8(first_byte);

        let payload_len = self.payload.len();
        let mask_bit = if self.masked { MASK_BIT } else { 0 };

        if payload_len < PAYLOAD_LEN_16 as usize {
            buf.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= u16::MAX as usize {
            buf.put_u8(mask_bit | PAYLOAD_LEN_16);
            buf.put_u16(payload_len as u16);
        } else {
            buf.put_u8(mask_bit | PAYLOAD_LEN_64);
            buf.put_u64(payload_len as u64);
        }

        match self.mask {
            Some(mask) if self.masked => {
                buf.put_slice(&mask);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], &mask);
            }
            _ => buf.put_slice(&self.payload),
        }
    }

    /// Parse a frame from the front of `buf`
    ///
    /// On success the frame's bytes are consumed. When the buffer holds only
    /// part of a frame, `FrameError::InsufficientData` is returned and the
    /// buffer is left untouched.
    pub fn parse(buf: &mut BytesMut, max_frame_size: usize) -> Result<Self> {
        if buf.len() < 2 {
            return Err(FrameError::InsufficientData {
                needed: 2,
                have: buf.len(),
            }
            .into());
        }

        let first_byte = buf[0];
        let fin = (first_byte & FIN_BIT) != 0;
        let rsv1 = (first_byte & RSV1_BIT) != 0;
        let rsv2 = (first_byte & RSV2_BIT) != 0;
        let rsv3 = (first_byte & RSV3_BIT) != 0;
        let opcode = Opcode::try_from(first_byte & OPCODE_MASK)?;

        if rsv1 || rsv2 || rsv3 {
            return Err(FrameError::ReservedBitsSet.into());
        }
        if opcode.is_control() && !fin {
            return Err(FrameError::FragmentedControlFrame.into());
        }

        let second_byte = buf[1];
        let masked = (second_byte & MASK_BIT) != 0;
        let mut header_len = 2;
        let payload_len = match second_byte & PAYLOAD_LEN_MASK {
            PAYLOAD_LEN_16 => {
                header_len += 2;
                ensure_len(buf, header_len)?;
                u16::from_be_bytes([buf[2], buf[3]]) as u64
            }
            PAYLOAD_LEN_64 => {
                header_len += 8;
                ensure_len(buf, header_len)?;
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                u64::from_be_bytes(len)
            }
            len => len as u64,
        };

        if opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::InvalidHeader(format!(
                "control frame payload of {} bytes",
                payload_len
            ))
            .into());
        }
        if payload_len > max_frame_size as u64 {
            return Err(FrameError::TooLarge {
                size: usize::try_from(payload_len).unwrap_or(usize::MAX),
                max: max_frame_size,
            }
            .into());
        }
        let payload_len = payload_len as usize;

        let mask = if masked {
            ensure_len(buf, header_len + MASKING_KEY_LEN)?;
            let mut mask = [0u8; 4];
            mask.copy_from_slice(&buf[header_len..header_len + MASKING_KEY_LEN]);
            header_len += MASKING_KEY_LEN;
            Some(mask)
        } else {
            None
        };

        ensure_len(buf, header_len + payload_len)?;

        buf.advance(header_len);
        let mut payload = buf.split_to(payload_len);
        if let Some(mask) = mask {
            apply_mask(&mut payload, &mask);
        }

        Ok(Frame {
            fin,
            rsv: [rsv1, rsv2, rsv3],
            opcode,
            masked,
            mask,
            payload: payload.freeze(),
        })
    }

    /// Split a close frame payload into its code and reason
    ///
    /// An empty payload yields `None`. A one-byte payload or a non-UTF-8
    /// reason is a protocol violation.
    pub fn close_payload(&self) -> Result<Option<(u16, String)>> {
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(FrameError::InvalidHeader("close payload of 1 byte".into()).into()),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                let reason = std::str::from_utf8(&self.payload[2..])
                    .map_err(|_| Error::InvalidUtf8)?
                    .to_string();
                Ok(Some((code, reason)))
            }
        }
    }

    /// Get the frame kind
    pub fn kind(&self) -> FrameKind {
        match self.opcode {
            Opcode::Text => FrameKind::Text,
            Opcode::Binary => FrameKind::Binary,
            Opcode::Close => FrameKind::Close,
            Opcode::Ping => FrameKind::Ping,
            Opcode::Pong => FrameKind::Pong,
            Opcode::Continuation => FrameKind::Continuation,
        }
    }

    /// Get the payload length
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check if this is a control frame
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Check if this is a data frame
    pub fn is_data(&self) -> bool {
        self.opcode.is_data()
    }
}

/// Frame kind for easier matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Text frame
    Text,
    /// Binary frame
    Binary,
    /// Close frame
    Close,
    /// Ping frame
    Ping,
    /// Pong frame
    Pong,
    /// Continuation frame
    Continuation,
}

fn ensure_len(buf: &BytesMut, needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(FrameError::InsufficientData {
            needed,
            have: buf.len(),
        }
        .into());
    }
    Ok(())
}

fn apply_mask(data: &mut [u8], mask: &[u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

// Close reasons are capped at 123 bytes; cut on a char boundary.
fn truncate_reason(reason: &str) -> &str {
    let max = crate::protocol::constants::MAX_CLOSE_REASON_SIZE;
    if reason.len() <= max {
        return reason;
    }
    let mut end = max;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// Frame parser for incremental parsing
#[derive(Debug)]
pub struct FrameParser {
    /// Buffer for partial frame data
    buffer: BytesMut,
    /// Largest accepted payload
    max_frame_size: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameParser {
    /// Create a new frame parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser that rejects payloads above `max_frame_size`
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Feed data to the parser and try to extract frames
    ///
    /// Parsing stops at the first error; the parser is cleared and the
    /// error is the last element.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match Frame::parse(&mut self.buffer, self.max_frame_size) {
                Ok(frame) => frames.push(Ok(frame)),
                Err(Error::Frame(FrameError::InsufficientData { .. })) => break,
                Err(e) => {
                    self.buffer.clear();
                    frames.push(Err(e));
                    break;
                }
            }
        }
        frames
    }

    /// Get the number of bytes currently buffered
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the parser buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_text_frame_serialization() {
        let frame = Frame::text("hello");
        let bytes = frame.to_bytes();

        assert_eq!(bytes[0], 0x81); // FIN=1, RSV=000, Opcode=0001
        assert_eq!(bytes[1], 0x05); // MASK=0, Length=5
        assert_eq!(&bytes[2..], b"hello");
    }

    #[test]
    fn test_masked_frame() {
        let frame = Frame::text("hello").mask(true);
        let bytes = frame.to_bytes();

        assert_eq!(bytes[1] & 0x80, 0x80);
        assert_eq!(bytes.len(), 2 + 4 + 5);
        // The in-memory payload stays readable
        assert_eq!(frame.payload, "hello");

        let mut buf = BytesMut::from(&bytes[..]);
        let parsed = Frame::parse(&mut buf, 1024).unwrap();
        assert!(parsed.masked);
        assert_eq!(parsed.payload, "hello");
    }

    #[test]
    fn test_frame_parsing() {
        let bytes = Frame::text("hello").to_bytes();
        let mut buf = BytesMut::from(&bytes[..]);

        let parsed = Frame::parse(&mut buf, 1024).unwrap();
        assert_eq!(parsed.kind(), FrameKind::Text);
        assert_eq!(parsed.payload, "hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_large_frame() {
        let frame = Frame::binary(vec![0u8; 65536]);
        let bytes = frame.to_bytes();

        assert_eq!(bytes[1], 127);
        assert_eq!(bytes[2..10], (65536u64).to_be_bytes());
    }

    #[test]
    fn test_frame_too_large() {
        let bytes = Frame::binary(vec![0u8; 300]).to_bytes();
        let mut buf = BytesMut::from(&bytes[..]);

        let err = Frame::parse(&mut buf, 256).unwrap_err();
        assert!(matches!(
            err,
            Error::Frame(FrameError::TooLarge { size: 300, max: 256 })
        ));
    }

    #[test]
    fn test_close_frame() {
        let frame = Frame::close(Some(1000), Some("Goodbye"));
        let bytes = frame.to_bytes();

        assert_eq!(bytes[0], 0x88);
        assert_eq!(bytes[1], 0x09);
        assert_eq!(&bytes[2..4], 1000u16.to_be_bytes());
        assert_eq!(&bytes[4..], b"Goodbye");

        assert_eq!(
            frame.close_payload().unwrap(),
            Some((1000, "Goodbye".to_string()))
        );
        assert_eq!(Frame::close(None, None).close_payload().unwrap(), None);
    }

    #[test]
    fn test_close_reason_truncated_on_char_boundary() {
        let reason = "é".repeat(100);
        let frame = Frame::close(Some(1000), Some(&reason));
        let (_, parsed) = frame.close_payload().unwrap().unwrap();
        assert!(parsed.len() <= 123);
        assert!(parsed.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_fragmented_control_frame_rejected() {
        let bytes = Frame::ping("x").fin(false).to_bytes();
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(matches!(
            Frame::parse(&mut buf, 1024),
            Err(Error::Frame(FrameError::FragmentedControlFrame))
        ));
    }

    #[test]
    fn test_frame_parser() {
        let mut parser = FrameParser::new();

        let bytes1 = Frame::text("frame1").to_bytes();
        let bytes2 = Frame::ping("ping").to_bytes();

        let frames = parser.feed(&bytes1[..5]);
        assert_eq!(frames.len(), 0);
        assert_eq!(parser.buffered_bytes(), 5);

        let frames = parser.feed(&bytes1[5..]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].as_ref().unwrap().is_data());

        let frames = parser.feed(&bytes2);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].as_ref().unwrap().is_control());
        assert_eq!(parser.buffered_bytes(), 0);
    }

    proptest! {
        #[test]
        fn masked_frames_survive_arbitrary_split_points(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            split in 0usize..600,
        ) {
            let bytes = Frame::binary(payload.clone()).mask(true).to_bytes();
            let split = split.min(bytes.len());

            let mut parser = FrameParser::new();
            let mut frames = parser.feed(&bytes[..split]);
            frames.extend(parser.feed(&bytes[split..]));

            prop_assert_eq!(frames.len(), 1);
            let frame = frames.pop().unwrap().unwrap();
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        }
    }
}
