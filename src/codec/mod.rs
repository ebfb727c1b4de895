//! Codec module - message serializers.
//!
//! WAMP messages are JSON-shaped arrays of [`serde_json::Value`]s. The
//! serializer negotiated during the RawSocket handshake decides how those
//! arrays become frame payloads:
//!
//! - [`JsonCodec`] - UTF-8 JSON text (RawSocket serializer id 1)
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (RawSocket serializer id 2)
//!
//! Codecs are marker structs with static methods; [`Serializer`] selects one
//! at runtime for the connection.
//!
//! # Example
//!
//! ```
//! use wamp_callee::codec::Serializer;
//! use serde_json::json;
//!
//! let message = json!([65, 1, 100]);
//! let bytes = Serializer::MsgPack.encode(&message).unwrap();
//! assert_eq!(Serializer::MsgPack.decode(&bytes).unwrap(), message);
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde_json::Value;

use crate::error::Result;

/// Serializer used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serializer {
    /// JSON text.
    Json,
    /// MessagePack.
    #[default]
    MsgPack,
}

impl Serializer {
    /// RawSocket serializer id.
    pub fn id(self) -> u8 {
        match self {
            Serializer::Json => 1,
            Serializer::MsgPack => 2,
        }
    }

    /// Look up a serializer by its RawSocket id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Serializer::Json),
            2 => Some(Serializer::MsgPack),
            _ => None,
        }
    }

    /// Encode a message value.
    pub fn encode(self, message: &Value) -> Result<Vec<u8>> {
        match self {
            Serializer::Json => JsonCodec::encode(message),
            Serializer::MsgPack => MsgPackCodec::encode(message),
        }
    }

    /// Decode a message value.
    pub fn decode(self, bytes: &[u8]) -> Result<Value> {
        match self {
            Serializer::Json => JsonCodec::decode(bytes),
            Serializer::MsgPack => MsgPackCodec::decode(bytes),
        }
    }
}
