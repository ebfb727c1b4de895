//! RawSocket wire format.
//!
//! Handshake (client and router each send 4 bytes once):
//! ```text
//! ┌──────┬────────────┬────────────┬──────────┐
//! │ 0x7F │ LLLL SSSS  │ reserved   │ reserved │
//! └──────┴────────────┴────────────┴──────────┘
//! L = max message length exponent (2^(9+L) bytes), S = serializer id
//! ```
//! A router rejects with `SSSS = 0` and the error code in the high nibble.
//!
//! Frame header (before every message):
//! ```text
//! ┌──────────────┬───────────────────────┐
//! │ 00000 TTT    │ Length                │
//! │ 1 byte       │ 3 bytes, uint24 BE    │
//! └──────────────┴───────────────────────┘
//! T = 0 regular message, 1 ping, 2 pong
//! ```

use crate::error::{CalleeError, Result};

/// Frame header size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Handshake size in bytes.
pub const HANDSHAKE_SIZE: usize = 4;

/// First handshake octet.
pub const HANDSHAKE_MAGIC: u8 = 0x7F;

/// Largest length exponent: 2^(9+15) = 16 MiB, the 24-bit frame limit.
pub const MAX_LENGTH_EXPONENT: u8 = 15;

/// Largest payload a frame header can describe.
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: u32 = (1 << 24) - 1;

const RESERVED_MASK: u8 = 0b1111_1000;

/// Max message size announced by a length exponent.
#[inline]
pub fn max_message_size(length_exponent: u8) -> u32 {
    let size = 1u64 << (9 + u32::from(length_exponent.min(MAX_LENGTH_EXPONENT)));
    size.min(u64::from(ABSOLUTE_MAX_PAYLOAD_SIZE)) as u32
}

/// Kind of a RawSocket frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Serialized WAMP message.
    Regular,
    /// Keep-alive probe; must be answered with a pong echoing the payload.
    Ping,
    /// Answer to a ping.
    Pong,
}

impl FrameType {
    fn to_bits(self) -> u8 {
        match self {
            FrameType::Regular => 0,
            FrameType::Ping => 1,
            FrameType::Pong => 2,
        }
    }

    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(FrameType::Regular),
            1 => Some(FrameType::Ping),
            2 => Some(FrameType::Pong),
            _ => None,
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame kind.
    pub frame_type: FrameType,
    /// Payload length in bytes (24 bits).
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(frame_type: FrameType, payload_length: u32) -> Self {
        Self {
            frame_type,
            payload_length,
        }
    }

    /// Header for a regular message frame.
    pub fn regular(payload_length: u32) -> Self {
        Self::new(FrameType::Regular, payload_length)
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use wamp_callee::protocol::Header;
    ///
    /// let bytes = Header::regular(300).encode();
    /// assert_eq!(bytes, [0x00, 0x00, 0x01, 0x2C]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        debug_assert!(self.payload_length <= ABSOLUTE_MAX_PAYLOAD_SIZE);
        let len = self.payload_length.to_be_bytes();
        [self.frame_type.to_bits(), len[1], len[2], len[3]]
    }

    /// Decode header from bytes.
    ///
    /// # Errors
    ///
    /// Fails if fewer than 4 bytes are given, reserved bits are set, or the
    /// frame type is unknown.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CalleeError::Framing(format!(
                "Header needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }

        if buf[0] & RESERVED_MASK != 0 {
            return Err(CalleeError::Framing(format!(
                "Reserved bits set in frame header: {:#04x}",
                buf[0]
            )));
        }

        let frame_type = FrameType::from_bits(buf[0])
            .ok_or_else(|| CalleeError::Framing(format!("Unknown frame type {}", buf[0])))?;
        let payload_length = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]);

        Ok(Self {
            frame_type,
            payload_length,
        })
    }
}

/// Handshake rejection reasons sent by a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// Code 0.
    Illegal,
    /// Code 1.
    SerializerUnsupported,
    /// Code 2.
    MaxLengthUnacceptable,
    /// Code 3.
    ReservedBitsUsed,
    /// Code 4.
    MaxConnectionCountReached,
    /// Any other code.
    Unknown(u8),
}

impl HandshakeError {
    fn from_code(code: u8) -> Self {
        match code {
            0 => HandshakeError::Illegal,
            1 => HandshakeError::SerializerUnsupported,
            2 => HandshakeError::MaxLengthUnacceptable,
            3 => HandshakeError::ReservedBitsUsed,
            4 => HandshakeError::MaxConnectionCountReached,
            other => HandshakeError::Unknown(other),
        }
    }
}

/// One side of the RawSocket handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Max message length exponent this side accepts.
    pub length_exponent: u8,
    /// Serializer id.
    pub serializer: u8,
}

impl Handshake {
    /// Create a handshake announcement.
    pub fn new(length_exponent: u8, serializer: u8) -> Self {
        Self {
            length_exponent: length_exponent.min(MAX_LENGTH_EXPONENT),
            serializer,
        }
    }

    /// Encode to the 4 handshake octets.
    pub fn encode(&self) -> [u8; HANDSHAKE_SIZE] {
        [
            HANDSHAKE_MAGIC,
            (self.length_exponent << 4) | (self.serializer & 0x0F),
            0,
            0,
        ]
    }

    /// Decode the router's reply.
    ///
    /// # Errors
    ///
    /// Fails on a bad magic octet, reserved bytes, or a router rejection.
    pub fn decode_reply(buf: &[u8; HANDSHAKE_SIZE]) -> Result<Self> {
        if buf[0] != HANDSHAKE_MAGIC {
            return Err(CalleeError::Handshake(format!(
                "Bad magic octet {:#04x}",
                buf[0]
            )));
        }
        if buf[2] != 0 || buf[3] != 0 {
            return Err(CalleeError::Handshake("Reserved handshake octets set".into()));
        }

        let serializer = buf[1] & 0x0F;
        let high = buf[1] >> 4;
        if serializer == 0 {
            return Err(CalleeError::Handshake(format!(
                "Router rejected connection: {:?}",
                HandshakeError::from_code(high)
            )));
        }

        Ok(Self {
            length_exponent: high,
            serializer,
        })
    }

    /// Max message size this side announced.
    pub fn max_message_size(&self) -> u32 {
        max_message_size(self.length_exponent)
    }
}
