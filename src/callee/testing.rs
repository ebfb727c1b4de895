//! In-memory [`ServerProxy`] for driving a [`Callee`](super::Callee) without
//! a router.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use super::ServerProxy;
use crate::error::{CalleeError, Result};
use crate::protocol::{Dict, RegisterOptions, RegistrationId, RequestId, YieldOptions};

/// A message recorded by [`RecordingProxy`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Register {
        request_id: RequestId,
        procedure: String,
        options: RegisterOptions,
    },
    Unregister {
        request_id: RequestId,
        registration_id: RegistrationId,
    },
    Yield {
        request_id: RequestId,
        progress: bool,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    },
    InvocationError {
        request_id: RequestId,
        error: String,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    },
}

/// Records every outbound message in order.
#[derive(Debug, Default)]
pub struct RecordingProxy {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl RecordingProxy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent sends fail with `ConnectionClosed`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    /// Forget recorded messages.
    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Positional arguments of every YIELD, in order.
    pub fn yields(&self) -> Vec<Option<Vec<Value>>> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Yield { arguments, .. } => Some(arguments.clone()),
                _ => None,
            })
            .collect()
    }

    /// Error URIs of every invocation ERROR, in order.
    pub fn error_uris(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::InvocationError { error, .. } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    /// Request id of the most recent REGISTER.
    pub fn last_register_id(&self) -> Option<RequestId> {
        self.sent.lock().iter().rev().find_map(|s| match s {
            Sent::Register { request_id, .. } => Some(*request_id),
            _ => None,
        })
    }

    /// Request id of the most recent UNREGISTER.
    pub fn last_unregister_id(&self) -> Option<RequestId> {
        self.sent.lock().iter().rev().find_map(|s| match s {
            Sent::Unregister { request_id, .. } => Some(*request_id),
            _ => None,
        })
    }

    /// Wait until at least `count` messages were recorded.
    ///
    /// # Panics
    ///
    /// Panics after five seconds.
    pub async fn wait_for_sent(&self, count: usize) {
        let wait = async {
            while self.sent.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!(
                "timed out waiting for {} messages, got {:?}",
                count,
                self.sent()
            );
        }
    }

    fn record(&self, message: Sent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CalleeError::ConnectionClosed);
        }
        self.sent.lock().push(message);
        Ok(())
    }
}

impl ServerProxy for RecordingProxy {
    fn register(
        &self,
        request_id: RequestId,
        options: &RegisterOptions,
        procedure: &str,
    ) -> Result<()> {
        self.record(Sent::Register {
            request_id,
            procedure: procedure.to_owned(),
            options: options.clone(),
        })
    }

    fn unregister(&self, request_id: RequestId, registration_id: RegistrationId) -> Result<()> {
        self.record(Sent::Unregister {
            request_id,
            registration_id,
        })
    }

    fn yield_result(
        &self,
        request_id: RequestId,
        options: &YieldOptions,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Result<()> {
        self.record(Sent::Yield {
            request_id,
            progress: options.is_progress(),
            arguments,
            arguments_kw,
        })
    }

    fn invocation_error(
        &self,
        request_id: RequestId,
        _details: &Dict,
        error: &str,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Result<()> {
        self.record(Sent::InvocationError {
            request_id,
            error: error.to_owned(),
            arguments,
            arguments_kw,
        })
    }
}
