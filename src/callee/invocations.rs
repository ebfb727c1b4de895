//! In-flight invocations that can still be interrupted.
//!
//! Two views are kept in step: invocation id → entry, and registration id →
//! the set of its invocation ids. Every change that touches both runs under
//! one mutex, so the views always agree. `contains` reads only the primary
//! map and takes no lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::handler::CancellableInvocation;
use crate::protocol::{RegistrationId, RequestId};

struct TrackedInvocation {
    registration_id: RegistrationId,
    handle: Arc<dyn CancellableInvocation>,
}

/// Tracks cancellable invocations by id and by registration.
#[derive(Default)]
pub struct InvocationTracker {
    invocations: DashMap<RequestId, TrackedInvocation>,
    by_registration: Mutex<HashMap<RegistrationId, HashSet<RequestId>>>,
}

impl InvocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` for invocation `id` under `registration_id`.
    pub fn track(
        &self,
        id: RequestId,
        registration_id: RegistrationId,
        handle: Arc<dyn CancellableInvocation>,
    ) {
        let mut index = self.by_registration.lock();
        let previous = self.invocations.insert(
            id,
            TrackedInvocation {
                registration_id,
                handle,
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(request_id = id, "Invocation id tracked twice");
            unindex(&mut index, previous.registration_id, id);
        }
        index.entry(registration_id).or_default().insert(id);
    }

    /// Forget invocation `id` after its result or error was sent.
    ///
    /// Returns `false` if it was not tracked.
    pub fn complete(&self, id: RequestId) -> bool {
        self.take(id).is_some()
    }

    /// Remove invocation `id` and return its cancellation handle.
    ///
    /// The caller signals the handle after this returns, outside the lock.
    pub fn cancel(&self, id: RequestId) -> Option<Arc<dyn CancellableInvocation>> {
        self.take(id).map(|entry| entry.handle)
    }

    /// Remove every invocation of `registration_id`. Returns the removed ids.
    pub fn remove_all_for_registration(&self, registration_id: RegistrationId) -> HashSet<RequestId> {
        let mut index = self.by_registration.lock();
        let ids = index.remove(&registration_id).unwrap_or_default();
        for id in &ids {
            self.invocations.remove(id);
        }
        ids
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut index = self.by_registration.lock();
        index.clear();
        self.invocations.clear();
    }

    /// Whether invocation `id` is tracked.
    pub fn contains(&self, id: RequestId) -> bool {
        self.invocations.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    /// Snapshot of the invocation ids tracked under `registration_id`.
    pub fn invocations_for(&self, registration_id: RegistrationId) -> HashSet<RequestId> {
        self.by_registration
            .lock()
            .get(&registration_id)
            .cloned()
            .unwrap_or_default()
    }

    fn take(&self, id: RequestId) -> Option<TrackedInvocation> {
        let mut index = self.by_registration.lock();
        let (_, entry) = self.invocations.remove(&id)?;
        unindex(&mut index, entry.registration_id, id);
        Some(entry)
    }
}

fn unindex(
    index: &mut HashMap<RegistrationId, HashSet<RequestId>>,
    registration_id: RegistrationId,
    id: RequestId,
) {
    if let Some(ids) = index.get_mut(&registration_id) {
        ids.remove(&id);
        if ids.is_empty() {
            index.remove(&registration_id);
        }
    }
}
