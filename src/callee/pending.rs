//! Correlation table for outstanding REGISTER/UNREGISTER requests.
//!
//! Each request gets a session-scoped id and a one-shot completion. The
//! router's reply resolves the entry by id; losing the connection fails all
//! of them at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{CalleeError, ConnectionLoss, Result};
use crate::protocol::RequestId;

/// One outstanding request: its payload plus the completion to resolve.
pub struct PendingRequest<P, T> {
    payload: P,
    completion: oneshot::Sender<Result<T>>,
}

impl<P, T> PendingRequest<P, T> {
    /// Create an entry and the future its caller awaits.
    pub fn new(payload: P) -> (Self, PendingResponse<T>) {
        let (completion, rx) = oneshot::channel();
        (Self { payload, completion }, PendingResponse { rx })
    }

    /// Data kept for the reply (operation, registration id).
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Split into payload and completion.
    pub fn into_parts(self) -> (P, Completion<T>) {
        (
            self.payload,
            Completion {
                tx: self.completion,
            },
        )
    }

    /// Resolve with a value.
    pub fn complete(self, value: T) {
        let _ = self.completion.send(Ok(value));
    }

    /// Resolve with an error.
    pub fn fail(self, error: CalleeError) {
        let _ = self.completion.send(Err(error));
    }
}

/// Completion half detached from its payload.
pub struct Completion<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Completion<T> {
    /// Resolve with a value.
    pub fn complete(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Resolve with an error.
    pub fn fail(self, error: CalleeError) {
        let _ = self.tx.send(Err(error));
    }
}

/// Future side of a pending request.
///
/// Resolves exactly once. If the entry is dropped unresolved it yields
/// [`CalleeError::Canceled`].
#[must_use = "the request's outcome is only observable by awaiting the response"]
#[derive(Debug)]
pub struct PendingResponse<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for PendingResponse<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(CalleeError::Canceled)))
    }
}

/// Id-keyed table of outstanding requests of one kind.
pub struct CorrelationTable<P, T> {
    next_id: AtomicU64,
    entries: DashMap<RequestId, PendingRequest<P, T>>,
}

impl<P, T> Default for CorrelationTable<P, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, T> CorrelationTable<P, T> {
    /// Create an empty table. Ids start at 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    /// Store `payload` under a fresh request id.
    pub fn allocate(&self, payload: P) -> (RequestId, PendingResponse<T>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (entry, response) = PendingRequest::new(payload);
        self.entries.insert(id, entry);
        (id, response)
    }

    /// Remove and return the entry for `id`. At most one caller gets it.
    pub fn resolve(&self, id: RequestId) -> Option<PendingRequest<P, T>> {
        self.entries.remove(&id).map(|(_, entry)| entry)
    }

    /// Whether `id` is outstanding.
    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Fail every outstanding entry with `loss`. Returns how many were failed.
    pub fn fail_all(&self, loss: &ConnectionLoss) -> usize {
        let ids: Vec<RequestId> = self.entries.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some(entry) = self.resolve(id) {
                entry.fail(CalleeError::ConnectionLost(loss.clone()));
                failed += 1;
            }
        }
        failed
    }

    /// Number of outstanding entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloseInfo;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ids_are_unique_and_resolve_once() {
        let table: CorrelationTable<&str, u32> = CorrelationTable::new();
        let (a, resp_a) = table.allocate("a");
        let (b, _resp_b) = table.allocate("b");
        assert_eq!(a, 1);
        assert_eq!(b, 2);

        let entry = table.resolve(a).unwrap();
        assert_eq!(*entry.payload(), "a");
        entry.complete(10);
        assert!(table.resolve(a).is_none());
        assert_eq!(resp_a.await.unwrap(), 10);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let table: CorrelationTable<(), ()> = CorrelationTable::new();
        let (_, r1) = table.allocate(());
        let (_, r2) = table.allocate(());

        let loss = ConnectionLoss::Broken(CloseInfo::new("wamp.close.system_shutdown"));
        assert_eq!(table.fail_all(&loss), 2);
        assert!(table.is_empty());

        for r in [r1, r2] {
            match r.await {
                Err(CalleeError::ConnectionLost(l)) => assert_eq!(l, loss),
                other => panic!("unexpected: {:?}", other.map(|_| ())),
            }
        }
    }

    #[tokio::test]
    async fn test_dropped_entry_is_canceled() {
        let table: CorrelationTable<(), ()> = CorrelationTable::new();
        let (id, response) = table.allocate(());
        drop(table.resolve(id));
        assert!(matches!(response.await, Err(CalleeError::Canceled)));
    }

    #[test]
    fn test_concurrent_allocation() {
        let table: Arc<CorrelationTable<usize, ()>> = Arc::new(CorrelationTable::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|i| table.allocate(t * 100 + i).0)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 800);
        assert_eq!(table.len(), 800);
    }
}
