//! Handler module - local operations that serve invocations.
//!
//! Provides:
//! - [`RpcOperation`] - what the callee invokes for each INVOCATION
//! - [`InvocationCallback`] - sends the YIELD or ERROR for one invocation
//! - [`SyncOperation`] - closure run to completion on the dispatching thread
//! - [`AsyncOperation`] - async closure spawned on tokio, cancellable
//!
//! # Example
//!
//! ```ignore
//! use wamp_callee::handler::{ParamType, SyncOperation};
//! use serde_json::json;
//!
//! let add = SyncOperation::new("com.example.add", |args| {
//!     let a: i64 = args.get(0)?;
//!     let b: i64 = args.get(1)?;
//!     Ok(json!(a + b))
//! })
//! .param("a", ParamType::Integer)
//! .param("b", ParamType::Integer);
//! ```

mod async_op;
mod context;
mod signature;
mod sync_op;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::protocol::{Dict, InterruptDetails, InvocationDetails};

pub use async_op::{AsyncOperation, TaskCancellation};
pub use context::InvocationCallback;
pub use signature::{CallArgs, CollectionResultTreatment, OperationSignature, ParamType, RpcParameter};
pub use sync_op::SyncOperation;

/// Boxed future for async handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A locally bound procedure.
pub trait RpcOperation: Send + Sync + 'static {
    /// Procedure URI this operation is registered under.
    fn procedure(&self) -> &str;

    /// Whether [`invoke`](Self::invoke) may return a cancellation handle.
    fn supports_cancellation(&self) -> bool;

    /// Start one invocation.
    ///
    /// The result or error goes out through `callback`. Returns a handle when
    /// the invocation is still running and can be interrupted; `None` when it
    /// already finished or can't be cancelled.
    fn invoke(
        &self,
        callback: InvocationCallback,
        details: InvocationDetails,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Option<Arc<dyn CancellableInvocation>>;
}

/// Handle to an in-flight invocation that accepts an interrupt.
///
/// Cancellation is advisory; the running operation decides when to stop.
pub trait CancellableInvocation: Send + Sync {
    /// Signal cancellation.
    fn cancel(&self, details: &InterruptDetails);
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}
