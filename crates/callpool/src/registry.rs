//! Context registry shared by the wait, timer and io managers
//!
//! Keys are a monotonically increasing `u64` handed back to callers as
//! the public id; they are never reused, so a stale id can only miss.
//! The removal gate lets `cancel_all` collect and clear the whole map
//! while concurrent dispatch thunks skip their self-erase.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use callpool_core::gate::{RemovalBan, RemovalGate};
use parking_lot::RwLock;

pub(crate) struct Registry<C> {
    entries: RwLock<HashMap<u64, Arc<C>>>,
    next_key: AtomicU64,
    gate: RemovalGate,
}

impl<C> Registry<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_key: AtomicU64::new(1),
            gate: RemovalGate::new(),
        }
    }

    /// Insert a context under a fresh key
    pub(crate) fn insert(&self, context: Arc<C>) -> u64 {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(key, context);
        key
    }

    pub(crate) fn get(&self, key: u64) -> Option<Arc<C>> {
        self.entries.read().get(&key).cloned()
    }

    pub(crate) fn remove(&self, key: u64) -> Option<Arc<C>> {
        self.entries.write().remove(&key)
    }

    /// Self-removal path for dispatch thunks: skipped while a
    /// cancel-all holds the gate.
    pub(crate) fn remove_if_permitted(&self, key: u64) -> bool {
        let mut entries = self.entries.write();
        if self.gate.removal_allowed() {
            entries.remove(&key).is_some()
        } else {
            false
        }
    }

    /// Collect and clear every context for a cancel-all.
    ///
    /// The returned ban must be held until the caller has finished
    /// shutting the contexts down.
    pub(crate) fn drain_for_cancel(&self) -> (RemovalBan<'_>, Vec<Arc<C>>) {
        let ban = self.gate.hold();
        let mut entries = self.entries.write();
        let contexts = entries.drain().map(|(_, ctx)| ctx).collect();
        drop(entries);
        (ban, contexts)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let registry = Registry::new();
        let key = registry.insert(Arc::new(7usize));

        assert_eq!(registry.get(key).as_deref(), Some(&7));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(key).is_some());
        assert!(registry.get(key).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_keys_never_reused() {
        let registry = Registry::new();
        let first = registry.insert(Arc::new(1usize));
        registry.remove(first);
        let second = registry.insert(Arc::new(2usize));
        assert_ne!(first, second);
    }

    #[test]
    fn test_removal_suppressed_under_ban() {
        let registry = Registry::new();
        let key = registry.insert(Arc::new(1usize));

        let (ban, drained) = registry.drain_for_cancel();
        assert_eq!(drained.len(), 1);
        // Self-removal during a cancel-all is a no-op
        assert!(!registry.remove_if_permitted(key));
        drop(ban);

        let key = registry.insert(Arc::new(2usize));
        assert!(registry.remove_if_permitted(key));
    }
}
