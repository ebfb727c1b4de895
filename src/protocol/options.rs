//! Typed option and detail dictionaries carried by callee messages.
//!
//! Every struct keeps keys it doesn't model in `extra`, so nothing a router
//! sends is lost when the dictionary is re-serialized.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Dict;
use crate::error::{CalleeError, Result};

/// Options of a REGISTER message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterOptions {
    /// URI matching policy: `exact` (default), `prefix` or `wildcard`.
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_policy: Option<String>,
    /// Shared registration policy, e.g. `single`, `roundrobin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke: Option<String>,
    /// Ask the router to disclose caller identity in invocation details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disclose_caller: Option<bool>,
    /// Unmodelled keys.
    #[serde(flatten)]
    pub extra: Dict,
}

impl RegisterOptions {
    /// Register with the given match policy.
    pub fn with_match(policy: impl Into<String>) -> Self {
        Self {
            match_policy: Some(policy.into()),
            ..Self::default()
        }
    }
}

/// Details of an INVOCATION message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationDetails {
    /// Actual procedure URI; routers send it for pattern-based registrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<String>,
    /// Caller session id, when disclosed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<u64>,
    /// Caller authentication id, when disclosed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_authid: Option<String>,
    /// Caller authentication role, when disclosed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_authrole: Option<String>,
    /// Caller accepts progressive results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_progress: Option<bool>,
    /// Call timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Unmodelled keys.
    #[serde(flatten)]
    pub extra: Dict,
}

/// Options of an INTERRUPT message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterruptDetails {
    /// Cancellation mode: `skip`, `kill` or `killnowait`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Reason URI, when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Unmodelled keys.
    #[serde(flatten)]
    pub extra: Dict,
}

/// Options of a YIELD message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YieldOptions {
    /// Progressive (non-final) result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<bool>,
    /// Unmodelled keys.
    #[serde(flatten)]
    pub extra: Dict,
}

impl YieldOptions {
    /// Options for a progressive result.
    pub fn progressive() -> Self {
        Self {
            progress: Some(true),
            ..Self::default()
        }
    }

    /// Whether this yield is a progressive (non-final) result.
    pub fn is_progress(&self) -> bool {
        self.progress.unwrap_or(false)
    }
}

/// Serialize a typed options struct into a wire dictionary.
pub fn to_dict<T: Serialize>(value: &T) -> Result<Dict> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CalleeError::Framing(format!(
            "Expected a dictionary, got {}",
            other
        ))),
    }
}

/// Parse a wire dictionary into a typed options struct.
pub fn from_dict<T: DeserializeOwned>(dict: Dict) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(dict))?)
}
