//! Declared operation shape: parameters, result treatment, reply conversion.
//!
//! An [`OperationSignature`] binds wire arguments to a handler's parameters
//! and turns the handler's outcome into a YIELD or ERROR. It is shared by
//! [`SyncOperation`](super::SyncOperation) and
//! [`AsyncOperation`](super::AsyncOperation).

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::InvocationCallback;
use crate::error::WampError;
use crate::protocol::{Dict, YieldOptions};

/// Expected JSON type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Anything, including `null`.
    Any,
    Bool,
    /// Number without a fractional part.
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl ParamType {
    /// Whether `value` has this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::Bool => value.is_boolean(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::String => value.is_string(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcParameter {
    /// Keyword name.
    pub name: String,
    /// Expected type.
    pub ty: ParamType,
    /// Value used when the caller omits the argument.
    pub default: Option<Value>,
    /// Positional index.
    pub position: usize,
}

impl RpcParameter {
    /// Whether the parameter may be omitted.
    #[inline]
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// How a returned array becomes YIELD arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionResultTreatment {
    /// Spread the array into positional results.
    #[default]
    Multivalued,
    /// Send the array as one positional result.
    SingleValue,
}

/// Procedure URI plus declared parameters and result policy.
#[derive(Debug, Clone)]
pub struct OperationSignature {
    procedure: String,
    parameters: Vec<RpcParameter>,
    has_result: bool,
    result_treatment: CollectionResultTreatment,
}

impl OperationSignature {
    /// Signature with no declared parameters; arguments pass through raw.
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            parameters: Vec::new(),
            has_result: true,
            result_treatment: CollectionResultTreatment::default(),
        }
    }

    /// Declare a required parameter at the next position.
    pub fn param(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.push_param(name.into(), ty, None)
    }

    /// Declare an optional parameter at the next position.
    pub fn optional_param(self, name: impl Into<String>, ty: ParamType, default: Value) -> Self {
        self.push_param(name.into(), ty, Some(default))
    }

    fn push_param(mut self, name: String, ty: ParamType, default: Option<Value>) -> Self {
        let position = self.parameters.len();
        self.parameters.push(RpcParameter {
            name,
            ty,
            default,
            position,
        });
        self
    }

    /// The handler's return value is ignored; YIELD carries no arguments.
    pub fn no_result(mut self) -> Self {
        self.has_result = false;
        self
    }

    /// Set how array results are sent.
    pub fn result_treatment(mut self, treatment: CollectionResultTreatment) -> Self {
        self.result_treatment = treatment;
        self
    }

    /// Procedure URI.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Declared parameters in positional order.
    pub fn parameters(&self) -> &[RpcParameter] {
        &self.parameters
    }

    /// Whether the return value is sent back.
    pub fn has_result(&self) -> bool {
        self.has_result
    }

    /// Array result policy.
    pub fn collection_result_treatment(&self) -> CollectionResultTreatment {
        self.result_treatment
    }

    /// Bind wire arguments to the declared parameters.
    ///
    /// Each parameter takes the positional argument at its index, else the
    /// keyword argument with its name, else its default. Positional
    /// arguments beyond the declared ones and unbound keywords stay available
    /// on [`CallArgs`].
    pub fn unpack(
        &self,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Result<CallArgs, WampError> {
        let mut positional = arguments.unwrap_or_default().into_iter();
        let mut keywords = arguments_kw.unwrap_or_default();
        let mut values = Vec::with_capacity(self.parameters.len());

        for param in &self.parameters {
            let value = match positional.next() {
                Some(value) => value,
                None => match keywords.remove(&param.name) {
                    Some(value) => value,
                    None => param.default.clone().ok_or_else(|| {
                        WampError::invalid_argument(format!(
                            "{}: missing argument '{}'",
                            self.procedure, param.name
                        ))
                    })?,
                },
            };

            if !param.ty.accepts(&value) {
                return Err(WampError::invalid_argument(format!(
                    "{}: argument '{}' expected {:?}, got {}",
                    self.procedure, param.name, param.ty, value
                )));
            }
            values.push(value);
        }

        Ok(CallArgs {
            values,
            names: self.parameters.iter().map(|p| p.name.clone()).collect(),
            rest: positional.collect(),
            keywords,
            outputs: Arc::default(),
        })
    }

    /// Send the handler outcome back through `callback`.
    ///
    /// `WampError`s are forwarded as they are; any other error becomes
    /// `wamp.error.runtime_error` carrying only its message.
    pub fn reply(
        &self,
        callback: &InvocationCallback,
        outcome: anyhow::Result<Value>,
        outputs: Dict,
    ) {
        let sent = match outcome {
            Ok(value) => {
                let arguments = self.result_arguments(value);
                let arguments_kw = if outputs.is_empty() {
                    None
                } else {
                    Some(outputs)
                };
                callback.result(YieldOptions::default(), arguments, arguments_kw)
            }
            Err(err) => {
                let error = match err.downcast::<WampError>() {
                    Ok(wamp) => wamp,
                    Err(other) => WampError::runtime_error(other.to_string()),
                };
                tracing::error!(
                    procedure = %self.procedure,
                    request_id = callback.request_id(),
                    "An error occurred while calling {}: {}",
                    self.procedure,
                    error
                );
                callback.error(&error)
            }
        };

        if let Err(e) = sent {
            tracing::warn!(
                request_id = callback.request_id(),
                "Failed to send invocation reply: {}",
                e
            );
        }
    }

    fn result_arguments(&self, value: Value) -> Option<Vec<Value>> {
        if !self.has_result {
            return None;
        }
        match (self.result_treatment, value) {
            (CollectionResultTreatment::Multivalued, Value::Array(items)) => Some(items),
            (_, value) => Some(vec![value]),
        }
    }
}

/// Output parameters shared between a handler and whoever sends its reply.
pub(crate) type OutputSlot = Arc<Mutex<Dict>>;

/// Arguments bound for one invocation, plus the output parameters a
/// handler sets for the reply.
///
/// Clones share the same output parameters.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    values: Vec<Value>,
    names: Vec<String>,
    rest: Vec<Value>,
    keywords: Dict,
    outputs: OutputSlot,
}

impl CallArgs {
    /// Argument at `index`: declared parameters first, then extra positionals.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, WampError> {
        let value = self
            .values
            .iter()
            .chain(self.rest.iter())
            .nth(index)
            .ok_or_else(|| WampError::invalid_argument(format!("missing argument #{}", index)))?;
        convert(value, &index.to_string())
    }

    /// Argument by declared parameter name, falling back to unbound keywords.
    pub fn get_named<T: DeserializeOwned>(&self, name: &str) -> Result<T, WampError> {
        let value = self
            .names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
            .or_else(|| self.keywords.get(name))
            .ok_or_else(|| WampError::invalid_argument(format!("missing argument '{}'", name)))?;
        convert(value, name)
    }

    /// Number of positional values (declared + extra).
    pub fn len(&self) -> usize {
        self.values.len() + self.rest.len()
    }

    /// Whether there are no positional values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keyword arguments not bound to a declared parameter.
    pub fn keywords(&self) -> &Dict {
        &self.keywords
    }

    /// Set an output parameter; outputs are sent as YIELD keyword arguments.
    pub fn set_output<T: Serialize>(&mut self, name: impl Into<String>, value: &T) -> Result<(), WampError> {
        let value = serde_json::to_value(value).map_err(|e| WampError::runtime_error(e.to_string()))?;
        self.outputs.lock().insert(name.into(), value);
        Ok(())
    }

    /// Take the output parameters set so far.
    pub fn take_outputs(&mut self) -> Dict {
        std::mem::take(&mut *self.outputs.lock())
    }

    pub(crate) fn output_slot(&self) -> OutputSlot {
        self.outputs.clone()
    }
}

fn convert<T: DeserializeOwned>(value: &Value, name: &str) -> Result<T, WampError> {
    serde_json::from_value(value.clone())
        .map_err(|e| WampError::invalid_argument(format!("argument '{}': {}", name, e)))
}
