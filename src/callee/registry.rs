//! Active registrations, keyed by router-assigned id.

use std::sync::Arc;

use dashmap::DashMap;

use crate::handler::RpcOperation;
use crate::protocol::RegistrationId;

/// Map from registration id to the operation serving it.
#[derive(Default)]
pub struct RegistrationRegistry {
    entries: DashMap<RegistrationId, Arc<dyn RpcOperation>>,
}

impl RegistrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `id` to `operation`, replacing any previous binding.
    pub fn put(&self, id: RegistrationId, operation: Arc<dyn RpcOperation>) {
        if self.entries.insert(id, operation).is_some() {
            tracing::warn!(registration_id = id, "Replaced existing registration");
        }
    }

    pub fn get(&self, id: RegistrationId) -> Option<Arc<dyn RpcOperation>> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: RegistrationId) -> Option<Arc<dyn RpcOperation>> {
        self.entries.remove(&id).map(|(_, op)| op)
    }

    pub fn contains(&self, id: RegistrationId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SyncOperation;
    use serde_json::Value;

    fn op(procedure: &str) -> Arc<dyn RpcOperation> {
        Arc::new(SyncOperation::new(procedure, |_| Ok(Value::Null)))
    }

    #[test]
    fn test_put_get_remove() {
        let registry = RegistrationRegistry::new();
        registry.put(10, op("com.example.a"));
        registry.put(11, op("com.example.b"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(10).unwrap().procedure(), "com.example.a");
        assert!(registry.get(12).is_none());

        let removed = registry.remove(10).unwrap();
        assert_eq!(removed.procedure(), "com.example.a");
        assert!(!registry.contains(10));
        assert!(registry.remove(10).is_none());
    }

    #[test]
    fn test_put_replaces() {
        let registry = RegistrationRegistry::new();
        registry.put(1, op("com.example.old"));
        registry.put(1, op("com.example.new"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(1).unwrap().procedure(), "com.example.new");
    }

    #[test]
    fn test_clear() {
        let registry = RegistrationRegistry::new();
        registry.put(1, op("com.example.a"));
        registry.put(2, op("com.example.b"));
        registry.clear();
        assert!(registry.is_empty());
    }
}
