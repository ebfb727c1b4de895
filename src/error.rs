//! Error types for wamp-callee.

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// Error URI used when a handler fails with a non-protocol error.
pub const RUNTIME_ERROR: &str = "wamp.error.runtime_error";

/// Error URI used when invocation arguments don't match the declared parameters.
pub const INVALID_ARGUMENT: &str = "wamp.error.invalid_argument";

/// Error URI used when an invocation targets a registration this callee doesn't know.
pub const NO_SUCH_REGISTRATION: &str = "wamp.error.no_such_registration";

/// Error URI used when a cancelled handler gives up.
pub const CANCELED: &str = "wamp.error.canceled";

/// ABORT reason sent when the peer sends a message that can't be decoded.
pub const PROTOCOL_VIOLATION: &str = "wamp.error.protocol_violation";

/// A WAMP-level error: an error URI plus its detail and argument payload.
///
/// Carried by ERROR messages in both directions. Handlers return it (through
/// `anyhow`) to send a specific error back to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct WampError {
    /// Error URI, e.g. `wamp.error.procedure_already_exists`.
    pub error: String,
    /// Details dictionary.
    pub details: Map<String, Value>,
    /// Positional error arguments.
    pub arguments: Option<Vec<Value>>,
    /// Keyword error arguments.
    pub arguments_kw: Option<Map<String, Value>>,
}

impl WampError {
    /// Create an error with an empty detail payload.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Map::new(),
            arguments: None,
            arguments_kw: None,
        }
    }

    /// Create an error from the parts of an ERROR message.
    pub fn from_parts(
        details: Map<String, Value>,
        error: impl Into<String>,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            error: error.into(),
            details,
            arguments,
            arguments_kw,
        }
    }

    /// Wrap a foreign failure. Only the message crosses the wire.
    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(RUNTIME_ERROR).with_arguments(vec![Value::String(message.into())])
    }

    /// Argument mismatch reported back to the caller.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(INVALID_ARGUMENT).with_arguments(vec![Value::String(message.into())])
    }

    /// Set positional arguments.
    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Set keyword arguments.
    pub fn with_arguments_kw(mut self, arguments_kw: Map<String, Value>) -> Self {
        self.arguments_kw = Some(arguments_kw);
        self
    }
}

/// Reason a session ended, as reported by GOODBYE/ABORT or by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseInfo {
    /// Close reason URI, e.g. `wamp.close.normal`.
    pub reason: String,
    /// Details dictionary from the closing message, if any.
    pub details: Map<String, Value>,
}

impl CloseInfo {
    /// Create close info with no details.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            details: Map::new(),
        }
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Cause applied to every outstanding request when the connection goes away.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionLoss {
    /// Session closed (GOODBYE, ABORT, EOF).
    Broken(CloseInfo),
    /// Transport or protocol failure; holds the error message.
    Error(String),
}

impl fmt::Display for ConnectionLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionLoss::Broken(info) => write!(f, "connection broken: {}", info),
            ConnectionLoss::Error(message) => write!(f, "connection error: {}", message),
        }
    }
}

/// Main error type for all callee operations.
#[derive(Debug, Error)]
pub enum CalleeError {
    /// Register/unregister attempted while no session is established.
    #[error("Session not established")]
    SessionNotEstablished,

    /// The router rejected a register/unregister request.
    #[error("Protocol error: {0}")]
    Protocol(WampError),

    /// The connection went away while the request was pending.
    #[error("Connection lost ({0})")]
    ConnectionLost(ConnectionLoss),

    /// Procedure URI failed validation.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// The pending request was dropped without being resolved.
    #[error("Request canceled")]
    Canceled,

    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed frame or message.
    #[error("Framing error: {0}")]
    Framing(String),

    /// RawSocket handshake or session join failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Writer channel closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using CalleeError.
pub type Result<T> = std::result::Result<T, CalleeError>;
