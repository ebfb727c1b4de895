//! Synchronous operation: a closure run to completion on the dispatching thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use super::{
    panic_message, CallArgs, CancellableInvocation, CollectionResultTreatment, InvocationCallback,
    OperationSignature, ParamType, RpcOperation,
};
use crate::error::WampError;
use crate::protocol::{Dict, InvocationDetails};

type SyncFn = dyn Fn(&mut CallArgs) -> anyhow::Result<Value> + Send + Sync;

/// Operation backed by a blocking closure.
///
/// The closure runs inside the INVOCATION dispatch, so the reply is sent
/// before [`invoke`](RpcOperation::invoke) returns. It can't be interrupted.
pub struct SyncOperation {
    signature: OperationSignature,
    handler: Box<SyncFn>,
}

impl SyncOperation {
    /// Wrap `handler` as the operation for `procedure`.
    pub fn new<F>(procedure: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut CallArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            signature: OperationSignature::new(procedure),
            handler: Box::new(handler),
        }
    }

    /// Replace the whole signature.
    pub fn with_signature(mut self, signature: OperationSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Declare a required parameter.
    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.signature = self.signature.param(name, ty);
        self
    }

    /// Declare an optional parameter.
    pub fn optional_param(mut self, name: impl Into<String>, ty: ParamType, default: Value) -> Self {
        self.signature = self.signature.optional_param(name, ty, default);
        self
    }

    /// Send no positional result.
    pub fn no_result(mut self) -> Self {
        self.signature = self.signature.no_result();
        self
    }

    /// Set how array results are sent.
    pub fn result_treatment(mut self, treatment: CollectionResultTreatment) -> Self {
        self.signature = self.signature.result_treatment(treatment);
        self
    }

    /// The operation's signature.
    pub fn signature(&self) -> &OperationSignature {
        &self.signature
    }
}

impl RpcOperation for SyncOperation {
    fn procedure(&self) -> &str {
        self.signature.procedure()
    }

    fn supports_cancellation(&self) -> bool {
        false
    }

    fn invoke(
        &self,
        callback: InvocationCallback,
        _details: InvocationDetails,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Option<Arc<dyn CancellableInvocation>> {
        let mut args = match self.signature.unpack(arguments, arguments_kw) {
            Ok(args) => args,
            Err(err) => {
                self.signature.reply(&callback, Err(err.into()), Dict::new());
                return None;
            }
        };

        let outcome = match catch_unwind(AssertUnwindSafe(|| (self.handler)(&mut args))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(WampError::runtime_error(panic_message(payload.as_ref())).into()),
        };

        self.signature.reply(&callback, outcome, args.take_outputs());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callee::testing::{RecordingProxy, Sent};
    use crate::error::{INVALID_ARGUMENT, RUNTIME_ERROR};
    use serde_json::json;

    fn add() -> SyncOperation {
        SyncOperation::new("com.example.add", |args| {
            let a: i64 = args.get(0)?;
            let b: i64 = args.get(1)?;
            Ok(json!(a + b))
        })
        .param("a", ParamType::Integer)
        .param("b", ParamType::Integer)
    }

    #[test]
    fn test_invoke_yields_result() {
        let proxy = RecordingProxy::new();
        let op = add();

        let handle = op.invoke(
            InvocationCallback::new(3, proxy.clone()),
            InvocationDetails::default(),
            Some(vec![json!(2), json!(3)]),
            None,
        );

        assert!(handle.is_none());
        assert!(!op.supports_cancellation());
        assert_eq!(proxy.yields(), vec![Some(vec![json!(5)])]);
    }

    #[test]
    fn test_invoke_bad_arguments() {
        let proxy = RecordingProxy::new();
        add().invoke(
            InvocationCallback::new(3, proxy.clone()),
            InvocationDetails::default(),
            Some(vec![json!(2)]),
            None,
        );

        assert_eq!(proxy.error_uris(), vec![INVALID_ARGUMENT.to_owned()]);
    }

    #[test]
    fn test_panic_becomes_runtime_error() {
        let proxy = RecordingProxy::new();
        let op = SyncOperation::new("com.example.boom", |_| panic!("kaboom"));

        op.invoke(
            InvocationCallback::new(4, proxy.clone()),
            InvocationDetails::default(),
            None,
            None,
        );

        assert_eq!(
            proxy.sent(),
            vec![Sent::InvocationError {
                request_id: 4,
                error: RUNTIME_ERROR.into(),
                arguments: Some(vec![json!("kaboom")]),
                arguments_kw: None,
            }]
        );
    }

    #[test]
    fn test_output_parameters_become_kwargs() {
        let proxy = RecordingProxy::new();
        let op = SyncOperation::new("com.example.divmod", |args| {
            let a: i64 = args.get(0)?;
            let b: i64 = args.get(1)?;
            args.set_output("remainder", &(a % b))?;
            Ok(json!(a / b))
        });

        op.invoke(
            InvocationCallback::new(5, proxy.clone()),
            InvocationDetails::default(),
            Some(vec![json!(7), json!(2)]),
            None,
        );

        assert_eq!(
            proxy.sent(),
            vec![Sent::Yield {
                request_id: 5,
                progress: false,
                arguments: Some(vec![json!(3)]),
                arguments_kw: json!({"remainder": 1}).as_object().cloned(),
            }]
        );
    }
}
