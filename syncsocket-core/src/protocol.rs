//! RFC 6455 definitions shared by both peers
//!
//! Opcodes, header bit layout, handshake header names and the key helpers
//! used to derive `Sec-WebSocket-Accept`.

use crate::error::FrameError;

/// Frame opcode
///
/// Reserved opcodes have no variant; converting one fails with
/// [`FrameError::InvalidOpcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Close frame
    Close = 0x8,
    /// Ping frame
    Ping = 0x9,
    /// Pong frame
    Pong = 0xA,
}

impl Opcode {
    /// Wire value
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Close, ping and pong
    pub fn is_control(&self) -> bool {
        (*self as u8) & 0x8 != 0
    }

    /// Text, binary and continuation
    pub fn is_data(&self) -> bool {
        !self.is_control()
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => return Err(FrameError::InvalidOpcode(other)),
        })
    }
}

/// Limits and defaults
pub mod constants {
    use std::time::Duration;

    /// Only protocol version spoken
    pub const WEBSOCKET_VERSION: &str = "13";

    /// GUID appended to the client key before hashing
    pub const WEBSOCKET_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

    /// Port used when a `ws://` address names none
    pub const DEFAULT_WS_PORT: u16 = 80;

    /// 16 MiB
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// 64 MiB
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

    /// Upper bound on the opening handshake
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

    /// How long a graceful stop waits for the peer's close reply
    pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Raw length of `Sec-WebSocket-Key` before base64
    pub const WEBSOCKET_KEY_LEN: usize = 16;

    /// Largest upgrade request or response head accepted
    pub const MAX_HEADER_SIZE: usize = 8192;

    /// A close payload is at most 125 bytes, two of which hold the code
    pub const MAX_CLOSE_REASON_SIZE: usize = 123;
}

/// First two header bytes of a frame
pub mod bits {
    /// Final fragment
    pub const FIN_BIT: u8 = 0x80;
    /// Extension bit 1
    pub const RSV1_BIT: u8 = 0x40;
    /// Extension bit 2
    pub const RSV2_BIT: u8 = 0x20;
    /// Extension bit 3
    pub const RSV3_BIT: u8 = 0x10;
    /// Low nibble of the first byte
    pub const OPCODE_MASK: u8 = 0x0F;
    /// High bit of the second byte
    pub const MASK_BIT: u8 = 0x80;
    /// Seven bit length field
    pub const PAYLOAD_LEN_MASK: u8 = 0x7F;
    /// Length follows as u16
    pub const PAYLOAD_LEN_16: u8 = 126;
    /// Length follows as u64
    pub const PAYLOAD_LEN_64: u8 = 127;
    /// Bytes in a masking key
    pub const MASKING_KEY_LEN: usize = 4;
    /// Control frames never carry more
    pub const MAX_CONTROL_PAYLOAD: usize = 125;
}

/// Header names, tokens and status codes of the upgrade exchange
///
/// Names are lowercase; lookups compare them case-insensitively.
pub mod http {
    /// `Host`
    pub const HOST: &str = "host";
    /// `User-Agent`
    pub const USER_AGENT: &str = "user-agent";
    /// `Server`
    pub const SERVER: &str = "server";
    /// `Connection`
    pub const CONNECTION: &str = "connection";
    /// `Upgrade`
    pub const UPGRADE: &str = "upgrade";
    /// `Sec-WebSocket-Key`
    pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
    /// `Sec-WebSocket-Version`
    pub const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";
    /// `Sec-WebSocket-Accept`
    pub const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";

    /// Value of the `Upgrade` header
    pub const WEBSOCKET_TOKEN: &str = "websocket";
    /// Value of the `Connection` header
    pub const UPGRADE_TOKEN: &str = "Upgrade";

    /// Handshake accepted
    pub const SWITCHING_PROTOCOLS: u16 = 101;
    /// Malformed upgrade request
    pub const BAD_REQUEST: u16 = 400;
    /// Server at capacity or shutting down
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// `Sec-WebSocket-Key` and `Sec-WebSocket-Accept` helpers
pub mod keys {
    use super::constants::{WEBSOCKET_KEY_LEN, WEBSOCKET_MAGIC, WEBSOCKET_VERSION};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use rand::RngCore;
    use sha1::{Digest, Sha1};

    /// Fresh random client key
    pub fn generate() -> String {
        let mut raw = [0u8; WEBSOCKET_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut raw);
        STANDARD.encode(raw)
    }

    /// Accept value the server must answer `key` with
    pub fn accept_for(key: &str) -> String {
        let digest = Sha1::new()
            .chain_update(key.as_bytes())
            .chain_update(WEBSOCKET_MAGIC.as_bytes())
            .finalize();
        STANDARD.encode(digest)
    }

    /// Whether `key` is base64 of exactly sixteen bytes
    pub fn is_valid(key: &str) -> bool {
        matches!(STANDARD.decode(key), Ok(raw) if raw.len() == WEBSOCKET_KEY_LEN)
    }

    /// Whether `version` is the one spoken here
    pub fn is_supported_version(version: &str) -> bool {
        version.trim() == WEBSOCKET_VERSION
    }
}
