//! Asynchronous operation: an async closure spawned on the tokio runtime.
//!
//! The dispatch returns as soon as the task is spawned. The returned
//! [`TaskCancellation`] lets an INTERRUPT signal the running handler through
//! its [`CancellationToken`].

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{
    panic_message, BoxFuture, CallArgs, CancellableInvocation, CollectionResultTreatment,
    InvocationCallback, OperationSignature, ParamType, RpcOperation,
};
use crate::error::{WampError, CANCELED};
use crate::protocol::{Dict, InterruptDetails, InvocationDetails, RequestId};

type AsyncFn =
    dyn Fn(CallArgs, CancellationToken) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;

/// Operation backed by an async closure.
///
/// Each invocation runs in its own task. Output parameters set on the
/// [`CallArgs`] before the future completes are sent with the result.
pub struct AsyncOperation {
    signature: OperationSignature,
    handler: Box<AsyncFn>,
}

impl AsyncOperation {
    /// Wrap `handler` as the operation for `procedure`.
    pub fn new<F, Fut>(procedure: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CallArgs, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            signature: OperationSignature::new(procedure),
            handler: Box::new(move |args, token| Box::pin(handler(args, token))),
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

impl RpcOperation for AsyncOperation {
    fn procedure(&self) -> &str {
        self.signature.procedure()
    }

    fn supports_cancellation(&self) -> bool {
        true
    }

    fn invoke(
        &self,
        callback: InvocationCallback,
        _details: InvocationDetails,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Option<Arc<dyn CancellableInvocation>> {
        let args = match self.signature.unpack(arguments, arguments_kw) {
            Ok(args) => args,
            Err(err) => {
                self.signature.reply(&callback, Err(err.into()), Dict::new());
                return None;
            }
        };

        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                let err = WampError::runtime_error(format!("no async runtime: {}", e));
                self.signature.reply(&callback, Err(err.into()), Dict::new());
                return None;
            }
        };

        let request_id = callback.request_id();
        let token = CancellationToken::new();
        let outputs = args.output_slot();
        let future = (self.handler)(args, token.clone());
        let signature = self.signature.clone();
        let task_token = token.clone();

        runtime.spawn(async move {
            // The inner task isolates handler panics.
            let outcome = match tokio::spawn(future).await {
                Ok(outcome) => outcome,
                Err(join) if join.is_panic() => Err(WampError::runtime_error(panic_message(
                    join.into_panic().as_ref(),
                ))
                .into()),
                Err(_) => Err(WampError::new(CANCELED).into()),
            };

            let outcome = match outcome {
                Err(e) if task_token.is_cancelled() && e.downcast_ref::<WampError>().is_none() => {
                    Err(WampError::new(CANCELED).into())
                }
                other => other,
            };

            let outputs = std::mem::take(&mut *outputs.lock());
            signature.reply(&callback, outcome, outputs);
        });

        Some(Arc::new(TaskCancellation { request_id, token }))
    }
}

/// Cancellation handle for a spawned invocation.
#[derive(Debug, Clone)]
pub struct TaskCancellation {
    request_id: RequestId,
    token: CancellationToken,
}

impl TaskCancellation {
    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl CancellableInvocation for TaskCancellation {
    fn cancel(&self, details: &InterruptDetails) {
        tracing::debug!(
            request_id = self.request_id,
            mode = ?details.mode,
            "Cancelling invocation"
        );
        self.token.cancel();
    }
}
