//! MsgPack codec using `rmp-serde`.
//!
//! Always encode with `to_vec_named`: routers expect structs as maps, and
//! `to_vec` would write them as positional arrays.

use serde_json::Value;

use crate::error::Result;

/// MessagePack codec for message payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes into a message value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid MsgPack or hold a type with
    /// no JSON counterpart (e.g. binary).
    #[inline]
    pub fn decode(bytes: &[u8]) -> Result<Value> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
