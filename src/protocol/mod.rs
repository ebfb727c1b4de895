//! Protocol module - RawSocket framing and the WAMP message model.
//!
//! - 4-byte handshake and frame header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Typed callee messages and their option dictionaries

mod frame;
mod frame_buffer;
mod message;
mod options;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{codes, WampMessage};
pub use options::{
    from_dict, to_dict, InterruptDetails, InvocationDetails, RegisterOptions, YieldOptions,
};
pub use wire_format::{
    max_message_size, FrameType, Handshake, HandshakeError, Header, ABSOLUTE_MAX_PAYLOAD_SIZE,
    HANDSHAKE_MAGIC, HANDSHAKE_SIZE, HEADER_SIZE, MAX_LENGTH_EXPONENT,
};

/// A WAMP dictionary.
pub type Dict = serde_json::Map<String, serde_json::Value>;

/// Request id, scoped to one session and one direction.
pub type RequestId = u64;

/// Router-assigned registration id.
pub type RegistrationId = u64;

/// Router-assigned session id.
pub type SessionId = u64;
