//! Frame struct with typed accessors.
//!
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use wamp_callee::protocol::{Frame, FrameType, Header};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::new(FrameType::Ping, 4), Bytes::from_static(b"ping"));
//! assert!(frame.is_ping());
//! assert_eq!(frame.payload(), b"ping");
//! ```

use bytes::Bytes;

use super::wire_format::{FrameType, Header, HEADER_SIZE};

/// A complete RawSocket frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    /// Check if this frame carries a WAMP message.
    #[inline]
    pub fn is_message(&self) -> bool {
        self.header.frame_type == FrameType::Regular
    }

    /// Check if this is a ping.
    #[inline]
    pub fn is_ping(&self) -> bool {
        self.header.frame_type == FrameType::Ping
    }

    /// Check if this is a pong.
    #[inline]
    pub fn is_pong(&self) -> bool {
        self.header.frame_type == FrameType::Pong
    }
}

/// Build a complete frame as a single byte vector.
///
/// ```
/// use wamp_callee::protocol::{build_frame, FrameType};
///
/// let bytes = build_frame(FrameType::Regular, b"[6,{},\"wamp.close.normal\"]");
/// assert_eq!(&bytes[..4], &[0, 0, 0, 26]);
/// ```
pub fn build_frame(frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(frame_type, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
