//! WAMP message model.
//!
//! Messages travel as JSON-shaped arrays whose first element is the message
//! code. Only the session and callee messages are modelled; everything else
//! decodes to [`WampMessage::Unsupported`].
//!
//! ```text
//! REGISTER     [64, Request|id, Options|dict, Procedure|uri]
//! REGISTERED   [65, REGISTER.Request|id, Registration|id]
//! UNREGISTER   [66, Request|id, REGISTERED.Registration|id]
//! UNREGISTERED [67, UNREGISTER.Request|id]
//! INVOCATION   [68, Request|id, REGISTERED.Registration|id, Details|dict, Args|list?, KwArgs|dict?]
//! INTERRUPT    [69, INVOCATION.Request|id, Options|dict]
//! YIELD        [70, INVOCATION.Request|id, Options|dict, Args|list?, KwArgs|dict?]
//! ERROR        [8, Type|int, Request|id, Details|dict, Error|uri, Args|list?, KwArgs|dict?]
//! ```

use serde_json::Value;

use super::options::{
    from_dict, to_dict, InterruptDetails, InvocationDetails, RegisterOptions, YieldOptions,
};
use super::{Dict, RegistrationId, RequestId, SessionId};
use crate::error::{CalleeError, Result};

/// Message type codes.
pub mod codes {
    pub const HELLO: u64 = 1;
    pub const WELCOME: u64 = 2;
    pub const ABORT: u64 = 3;
    pub const GOODBYE: u64 = 6;
    pub const ERROR: u64 = 8;
    pub const REGISTER: u64 = 64;
    pub const REGISTERED: u64 = 65;
    pub const UNREGISTER: u64 = 66;
    pub const UNREGISTERED: u64 = 67;
    pub const INVOCATION: u64 = 68;
    pub const INTERRUPT: u64 = 69;
    pub const YIELD: u64 = 70;
}

/// A decoded WAMP message.
#[derive(Debug, Clone, PartialEq)]
pub enum WampMessage {
    Hello {
        realm: String,
        details: Dict,
    },
    Welcome {
        session: SessionId,
        details: Dict,
    },
    Abort {
        details: Dict,
        reason: String,
    },
    Goodbye {
        details: Dict,
        reason: String,
    },
    Error {
        request_type: u64,
        request: RequestId,
        details: Dict,
        error: String,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    },
    Register {
        request: RequestId,
        options: RegisterOptions,
        procedure: String,
    },
    Registered {
        request: RequestId,
        registration: RegistrationId,
    },
    Unregister {
        request: RequestId,
        registration: RegistrationId,
    },
    Unregistered {
        request: RequestId,
    },
    Invocation {
        request: RequestId,
        registration: RegistrationId,
        details: InvocationDetails,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    },
    Interrupt {
        request: RequestId,
        options: InterruptDetails,
    },
    Yield {
        request: RequestId,
        options: YieldOptions,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    },
    /// A message this callee doesn't handle (pub/sub, caller side, ...).
    Unsupported {
        code: u64,
    },
}

impl WampMessage {
    /// Message type code.
    pub fn code(&self) -> u64 {
        match self {
            WampMessage::Hello { .. } => codes::HELLO,
            WampMessage::Welcome { .. } => codes::WELCOME,
            WampMessage::Abort { .. } => codes::ABORT,
            WampMessage::Goodbye { .. } => codes::GOODBYE,
            WampMessage::Error { .. } => codes::ERROR,
            WampMessage::Register { .. } => codes::REGISTER,
            WampMessage::Registered { .. } => codes::REGISTERED,
            WampMessage::Unregister { .. } => codes::UNREGISTER,
            WampMessage::Unregistered { .. } => codes::UNREGISTERED,
            WampMessage::Invocation { .. } => codes::INVOCATION,
            WampMessage::Interrupt { .. } => codes::INTERRUPT,
            WampMessage::Yield { .. } => codes::YIELD,
            WampMessage::Unsupported { code } => *code,
        }
    }

    /// Encode into the array form.
    ///
    /// # Errors
    ///
    /// Fails for [`WampMessage::Unsupported`], which has no body to encode.
    pub fn to_value(&self) -> Result<Value> {
        let mut items = vec![Value::from(self.code())];
        match self {
            WampMessage::Hello { realm, details } => {
                items.push(Value::from(realm.as_str()));
                items.push(Value::Object(details.clone()));
            }
            WampMessage::Welcome { session, details } => {
                items.push(Value::from(*session));
                items.push(Value::Object(details.clone()));
            }
            WampMessage::Abort { details, reason } | WampMessage::Goodbye { details, reason } => {
                items.push(Value::Object(details.clone()));
                items.push(Value::from(reason.as_str()));
            }
            WampMessage::Error {
                request_type,
                request,
                details,
                error,
                arguments,
                arguments_kw,
            } => {
                items.push(Value::from(*request_type));
                items.push(Value::from(*request));
                items.push(Value::Object(details.clone()));
                items.push(Value::from(error.as_str()));
                push_payload(&mut items, arguments, arguments_kw);
            }
            WampMessage::Register {
                request,
                options,
                procedure,
            } => {
                items.push(Value::from(*request));
                items.push(Value::Object(to_dict(options)?));
                items.push(Value::from(procedure.as_str()));
            }
            WampMessage::Registered {
                request,
                registration,
            }
            | WampMessage::Unregister {
                request,
                registration,
            } => {
                items.push(Value::from(*request));
                items.push(Value::from(*registration));
            }
            WampMessage::Unregistered { request } => {
                items.push(Value::from(*request));
            }
            WampMessage::Invocation {
                request,
                registration,
                details,
                arguments,
                arguments_kw,
            } => {
                items.push(Value::from(*request));
                items.push(Value::from(*registration));
                items.push(Value::Object(to_dict(details)?));
                push_payload(&mut items, arguments, arguments_kw);
            }
            WampMessage::Interrupt { request, options } => {
                items.push(Value::from(*request));
                items.push(Value::Object(to_dict(options)?));
            }
            WampMessage::Yield {
                request,
                options,
                arguments,
                arguments_kw,
            } => {
                items.push(Value::from(*request));
                items.push(Value::Object(to_dict(options)?));
                push_payload(&mut items, arguments, arguments_kw);
            }
            WampMessage::Unsupported { code } => {
                return Err(CalleeError::Framing(format!(
                    "Cannot encode unsupported message type {}",
                    code
                )));
            }
        }
        Ok(Value::Array(items))
    }

    /// Decode from the array form.
    ///
    /// # Errors
    ///
    /// Fails if the value isn't an array or a known message has the wrong shape.
    pub fn from_value(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(CalleeError::Framing(format!(
                    "Message must be an array, got {}",
                    other
                )))
            }
        };
        let mut fields = Fields::new(items);
        let code = fields.id("message type")?;

        let message = match code {
            codes::HELLO => WampMessage::Hello {
                realm: fields.string("realm")?,
                details: fields.dict("details")?,
            },
            codes::WELCOME => WampMessage::Welcome {
                session: fields.id("session")?,
                details: fields.dict("details")?,
            },
            codes::ABORT => WampMessage::Abort {
                details: fields.dict("details")?,
                reason: fields.string("reason")?,
            },
            codes::GOODBYE => WampMessage::Goodbye {
                details: fields.dict("details")?,
                reason: fields.string("reason")?,
            },
            codes::ERROR => WampMessage::Error {
                request_type: fields.id("request type")?,
                request: fields.id("request")?,
                details: fields.dict("details")?,
                error: fields.string("error")?,
                arguments: fields.opt_list("arguments")?,
                arguments_kw: fields.opt_dict("arguments_kw")?,
            },
            codes::REGISTER => WampMessage::Register {
                request: fields.id("request")?,
                options: from_dict(fields.dict("options")?)?,
                procedure: fields.string("procedure")?,
            },
            codes::REGISTERED => WampMessage::Registered {
                request: fields.id("request")?,
                registration: fields.id("registration")?,
            },
            codes::UNREGISTER => WampMessage::Unregister {
                request: fields.id("request")?,
                registration: fields.id("registration")?,
            },
            codes::UNREGISTERED => WampMessage::Unregistered {
                request: fields.id("request")?,
            },
            codes::INVOCATION => WampMessage::Invocation {
                request: fields.id("request")?,
                registration: fields.id("registration")?,
                details: from_dict(fields.dict("details")?)?,
                arguments: fields.opt_list("arguments")?,
                arguments_kw: fields.opt_dict("arguments_kw")?,
            },
            codes::INTERRUPT => WampMessage::Interrupt {
                request: fields.id("request")?,
                options: from_dict(fields.dict("options")?)?,
            },
            codes::YIELD => WampMessage::Yield {
                request: fields.id("request")?,
                options: from_dict(fields.dict("options")?)?,
                arguments: fields.opt_list("arguments")?,
                arguments_kw: fields.opt_dict("arguments_kw")?,
            },
            other => WampMessage::Unsupported { code: other },
        };
        Ok(message)
    }
}

/// Append optional payload. Keyword arguments require a (possibly empty)
/// positional list before them.
fn push_payload(items: &mut Vec<Value>, arguments: &Option<Vec<Value>>, arguments_kw: &Option<Dict>) {
    match (arguments, arguments_kw) {
        (None, None) => {}
        (Some(args), None) => items.push(Value::Array(args.clone())),
        (args, Some(kwargs)) => {
            items.push(Value::Array(args.clone().unwrap_or_default()));
            items.push(Value::Object(kwargs.clone()));
        }
    }
}

/// Positional field reader over a message array.
struct Fields {
    items: std::vec::IntoIter<Value>,
}

impl Fields {
    fn new(items: Vec<Value>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }

    fn required(&mut self, name: &str) -> Result<Value> {
        self.items
            .next()
            .ok_or_else(|| CalleeError::Framing(format!("Missing message field '{}'", name)))
    }

    fn id(&mut self, name: &str) -> Result<u64> {
        let value = self.required(name)?;
        value.as_u64().ok_or_else(|| {
            CalleeError::Framing(format!("Field '{}' must be an id, got {}", name, value))
        })
    }

    fn string(&mut self, name: &str) -> Result<String> {
        match self.required(name)? {
            Value::String(s) => Ok(s),
            other => Err(CalleeError::Framing(format!(
                "Field '{}' must be a string, got {}",
                name, other
            ))),
        }
    }

    fn dict(&mut self, name: &str) -> Result<Dict> {
        match self.required(name)? {
            Value::Object(map) => Ok(map),
            other => Err(CalleeError::Framing(format!(
                "Field '{}' must be a dictionary, got {}",
                name, other
            ))),
        }
    }

    fn opt_list(&mut self, name: &str) -> Result<Option<Vec<Value>>> {
        match self.items.next() {
            None => Ok(None),
            Some(Value::Array(list)) => Ok(Some(list)),
            Some(other) => Err(CalleeError::Framing(format!(
                "Field '{}' must be a list, got {}",
                name, other
            ))),
        }
    }

    fn opt_dict(&mut self, name: &str) -> Result<Option<Dict>> {
        match self.items.next() {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(CalleeError::Framing(format!(
                "Field '{}' must be a dictionary, got {}",
                name, other
            ))),
        }
    }
}
