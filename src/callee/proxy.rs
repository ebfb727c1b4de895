//! Outbound side of the callee: the messages it sends to the router.

use bytes::Bytes;
use serde_json::Value;

use crate::codec::Serializer;
use crate::error::{CalleeError, Result};
use crate::protocol::{
    codes, Dict, RegisterOptions, RegistrationId, RequestId, WampMessage, YieldOptions,
};
use crate::writer::{OutboundFrame, WriterHandle};

/// Sends callee messages to the router.
///
/// Calls come from the dispatch path and from handler tasks, so they must
/// not block.
pub trait ServerProxy: Send + Sync + 'static {
    /// Send REGISTER.
    fn register(&self, request_id: RequestId, options: &RegisterOptions, procedure: &str)
        -> Result<()>;

    /// Send UNREGISTER.
    fn unregister(&self, request_id: RequestId, registration_id: RegistrationId) -> Result<()>;

    /// Send YIELD for an invocation.
    fn yield_result(
        &self,
        request_id: RequestId,
        options: &YieldOptions,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Result<()>;

    /// Send ERROR answering an INVOCATION.
    fn invocation_error(
        &self,
        request_id: RequestId,
        details: &Dict,
        error: &str,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Result<()>;
}

/// [`ServerProxy`] that serializes messages onto a RawSocket writer.
#[derive(Clone)]
pub struct MessageProxy {
    writer: WriterHandle,
    serializer: Serializer,
    max_message_size: usize,
}

impl MessageProxy {
    pub fn new(writer: WriterHandle, serializer: Serializer, max_message_size: usize) -> Self {
        Self {
            writer,
            serializer,
            max_message_size,
        }
    }

    /// Serialize and queue one message.
    pub fn send(&self, message: &WampMessage) -> Result<()> {
        let payload = encode_message(self.serializer, message, self.max_message_size)?;
        tracing::trace!(code = message.code(), len = payload.len(), "Sending message");
        self.writer.try_send(OutboundFrame::message(payload))
    }
}

/// Encode `message`, rejecting payloads above the negotiated limit.
pub(crate) fn encode_message(
    serializer: Serializer,
    message: &WampMessage,
    max_message_size: usize,
) -> Result<Bytes> {
    let payload = serializer.encode(&message.to_value()?)?;
    if payload.len() > max_message_size {
        return Err(CalleeError::Framing(format!(
            "message of {} bytes exceeds limit of {}",
            payload.len(),
            max_message_size
        )));
    }
    Ok(Bytes::from(payload))
}

impl ServerProxy for MessageProxy {
    fn register(
        &self,
        request_id: RequestId,
        options: &RegisterOptions,
        procedure: &str,
    ) -> Result<()> {
        self.send(&WampMessage::Register {
            request: request_id,
            options: options.clone(),
            procedure: procedure.to_owned(),
        })
    }

    fn unregister(&self, request_id: RequestId, registration_id: RegistrationId) -> Result<()> {
        self.send(&WampMessage::Unregister {
            request: request_id,
            registration: registration_id,
        })
    }

    fn yield_result(
        &self,
        request_id: RequestId,
        options: &YieldOptions,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Result<()> {
        self.send(&WampMessage::Yield {
            request: request_id,
            options: options.clone(),
            arguments,
            arguments_kw,
        })
    }

    fn invocation_error(
        &self,
        request_id: RequestId,
        details: &Dict,
        error: &str,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Result<()> {
        self.send(&WampMessage::Error {
            request_type: codes::INVOCATION,
            request: request_id,
            details: details.clone(),
            error: error.to_owned(),
            arguments,
            arguments_kw,
        })
    }
}
