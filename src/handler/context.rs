//! Invocation callback for handlers.
//!
//! Provides methods for answering one INVOCATION:
//! - `result` - send a YIELD (final, or progressive with `progress: true`)
//! - `progress` - send a progressive YIELD
//! - `error` - send an ERROR
//!
//! A final result or error also completes the invocation's tracker entry,
//! so a later INTERRUPT for it becomes a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::callee::{InvocationTracker, ServerProxy};
use crate::error::{Result, WampError};
use crate::protocol::{Dict, RequestId, YieldOptions};

/// Reply channel for one invocation.
///
/// `InvocationCallback` is `Clone` and can be moved into spawned tasks.
#[derive(Clone)]
pub struct InvocationCallback {
    request_id: RequestId,
    proxy: Arc<dyn ServerProxy>,
    tracker: Option<Arc<InvocationTracker>>,
    finished: Arc<AtomicBool>,
}

impl InvocationCallback {
    /// Create a callback that only sends replies.
    pub fn new(request_id: RequestId, proxy: Arc<dyn ServerProxy>) -> Self {
        Self {
            request_id,
            proxy,
            tracker: None,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a callback that also completes the tracker entry on reply.
    pub(crate) fn tracked(
        request_id: RequestId,
        proxy: Arc<dyn ServerProxy>,
        tracker: Arc<InvocationTracker>,
    ) -> Self {
        Self {
            tracker: Some(tracker),
            ..Self::new(request_id, proxy)
        }
    }

    /// Request id of the invocation being answered.
    #[inline]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Whether a final result or error has been delivered.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Send a YIELD.
    ///
    /// A progressive yield (`options.progress == Some(true)`) leaves the
    /// invocation running.
    pub fn result(
        &self,
        options: YieldOptions,
        arguments: Option<Vec<Value>>,
        arguments_kw: Option<Dict>,
    ) -> Result<()> {
        if !options.is_progress() {
            self.finish();
        }
        self.proxy
            .yield_result(self.request_id, &options, arguments, arguments_kw)
    }

    /// Send a progressive YIELD.
    pub fn progress(&self, arguments: Option<Vec<Value>>, arguments_kw: Option<Dict>) -> Result<()> {
        self.result(YieldOptions::progressive(), arguments, arguments_kw)
    }

    /// Send an ERROR for this invocation.
    pub fn error(&self, error: &WampError) -> Result<()> {
        self.finish();
        self.proxy.invocation_error(
            self.request_id,
            &error.details,
            &error.error,
            error.arguments.clone(),
            error.arguments_kw.clone(),
        )
    }

    // The flag is set before the tracker is touched; the callee re-checks it
    // after tracking, so one of the two always removes the entry.
    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        if let Some(tracker) = &self.tracker {
            tracker.complete(self.request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callee::testing::{RecordingProxy, Sent};
    use crate::handler::CancellableInvocation;
    use crate::protocol::InterruptDetails;
    use serde_json::json;

    struct Noop;

    impl CancellableInvocation for Noop {
        fn cancel(&self, _details: &InterruptDetails) {}
    }

    #[test]
    fn test_result_sends_yield() {
        let proxy = RecordingProxy::new();
        let callback = InvocationCallback::new(7, proxy.clone());

        callback
            .result(YieldOptions::default(), Some(vec![json!(5)]), None)
            .unwrap();

        assert!(callback.is_finished());
        assert_eq!(
            proxy.sent(),
            vec![Sent::Yield {
                request_id: 7,
                progress: false,
                arguments: Some(vec![json!(5)]),
                arguments_kw: None,
            }]
        );
    }

    #[test]
    fn test_error_sends_invocation_error() {
        let proxy = RecordingProxy::new();
        let callback = InvocationCallback::new(9, proxy.clone());

        callback
            .error(&WampError::new("com.example.error.overflow"))
            .unwrap();

        assert_eq!(
            proxy.sent(),
            vec![Sent::InvocationError {
                request_id: 9,
                error: "com.example.error.overflow".into(),
                arguments: None,
                arguments_kw: None,
            }]
        );
    }

    #[test]
    fn test_final_result_completes_tracker_entry() {
        let proxy = RecordingProxy::new();
        let tracker = Arc::new(InvocationTracker::new());
        tracker.track(7, 100, Arc::new(Noop));

        let callback = InvocationCallback::tracked(7, proxy, tracker.clone());
        callback.progress(Some(vec![json!(1)]), None).unwrap();
        assert!(tracker.contains(7));
        assert!(!callback.is_finished());

        callback.result(YieldOptions::default(), None, None).unwrap();
        assert!(!tracker.contains(7));
        assert!(callback.is_finished());
    }

    #[test]
    fn test_clones_share_finished_state() {
        let proxy = RecordingProxy::new();
        let callback = InvocationCallback::new(1, proxy);
        let clone = callback.clone();

        clone.error(&WampError::runtime_error("boom")).unwrap();
        assert!(callback.is_finished());
    }
}
