//! Collision-free integer handle allocation for long-lived listeners.

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// Largest identifier handed out before wrapping back to 1 (2^53 - 1).
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Maps small integer handles to live listener objects.
///
/// Identifiers advance monotonically from the last allocated one and wrap
/// from [`MAX_SAFE_INTEGER`] back to 1. An identifier that is still mapped
/// is never handed out again. All mutation happens under one lock;
/// [`entries`](Self::entries) and [`values`](Self::values) return copies so
/// callers can iterate while the registry keeps changing.
#[derive(Debug)]
pub struct RegistryMap<T> {
    name: String,
    inner: Mutex<RegistryInner<T>>,
}

#[derive(Debug)]
struct RegistryInner<T> {
    last_id: u64,
    items: BTreeMap<u64, T>,
}

impl<T> RegistryMap<T> {
    /// Creates an empty registry. `name` only appears in diagnostics.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(RegistryInner {
                last_id: 0,
                items: BTreeMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores `item` under the next free identifier and returns it.
    pub fn add(&self, item: T) -> u64 {
        let mut inner = self.inner.lock();
        let mut id = inner.last_id;
        loop {
            id = if id < MAX_SAFE_INTEGER { id + 1 } else { 1 };
            if !inner.items.contains_key(&id) {
                break;
            }
        }
        inner.last_id = id;
        inner.items.insert(id, item);
        id
    }

    /// Removes the entry for `id`, returning it.
    ///
    /// A missing entry is not an error; it is reported as a diagnostic.
    pub fn remove(&self, id: u64) -> Option<T> {
        let removed = self.inner.lock().items.remove(&id);
        if removed.is_none() {
            tracing::error!(
                registry = %self.name,
                id,
                "Failed to remove {}: item with id [{}] does not exist",
                self.name,
                id
            );
        }
        removed
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().items.contains_key(&id)
    }
}

impl<T: Clone> RegistryMap<T> {
    #[must_use]
    pub fn get(&self, id: u64) -> Option<T> {
        self.inner.lock().items.get(&id).cloned()
    }

    /// Snapshot of all `(id, item)` pairs.
    #[must_use]
    pub fn entries(&self) -> Vec<(u64, T)> {
        self.inner
            .lock()
            .items
            .iter()
            .map(|(id, item)| (*id, item.clone()))
            .collect()
    }

    /// Snapshot of all items.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.inner.lock().items.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    fn registry_after(last_id: u64) -> RegistryMap<&'static str> {
        let registry = RegistryMap::new("test");
        registry.inner.lock().last_id = last_id;
        registry
    }

    #[test]
    fn ids_start_at_one_and_advance() {
        let registry = RegistryMap::new("subscriptions");
        assert_eq!(registry.add("a"), 1);
        assert_eq!(registry.add("b"), 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(2), Some("b"));
    }

    #[test]
    fn removed_ids_are_not_reused_before_wrap() {
        let registry = RegistryMap::new("subscriptions");
        let first = registry.add("a");
        assert_eq!(registry.remove(first), Some("a"));
        assert_eq!(registry.add("b"), 2);
    }

    #[test]
    fn remove_missing_id_is_non_fatal() {
        let registry: RegistryMap<u8> = RegistryMap::new("subscriptions");
        assert_eq!(registry.remove(99), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn wraps_to_one_after_max_safe_integer() {
        let registry = registry_after(MAX_SAFE_INTEGER - 1);
        assert_eq!(registry.add("last"), MAX_SAFE_INTEGER);
        assert_eq!(registry.add("wrapped"), 1);
    }

    #[test]
    fn wrap_skips_live_entries() {
        let registry = registry_after(0);
        registry.add("one");
        registry.add("two");
        registry.inner.lock().last_id = MAX_SAFE_INTEGER;
        assert_eq!(registry.add("three"), 3);
    }

    #[test]
    fn snapshots_are_detached_copies() {
        let registry = RegistryMap::new("listeners");
        registry.add("a");
        registry.add("b");
        let entries = registry.entries();
        for (id, _) in &entries {
            registry.remove(*id);
        }
        assert_eq!(entries, vec![(1, "a"), (2, "b")]);
        assert!(registry.values().is_empty());
    }

    #[test]
    fn concurrent_adds_never_collide() {
        let registry = Arc::new(RegistryMap::new("listeners"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || (0..250).map(|i| registry.add(i)).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(registry.len(), 2000);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Add,
        Remove(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![Just(Step::Add), any::<usize>().prop_map(Step::Remove)]
    }

    proptest! {
        #[test]
        fn live_ids_stay_unique(start in prop_oneof![Just(0u64), (MAX_SAFE_INTEGER - 8)..=MAX_SAFE_INTEGER],
                                steps in prop::collection::vec(step(), 1..200)) {
            let registry = registry_after(start);
            let mut live: Vec<u64> = Vec::new();
            for step in steps {
                match step {
                    Step::Add => {
                        let id = registry.add("item");
                        prop_assert!((1..=MAX_SAFE_INTEGER).contains(&id));
                        prop_assert!(!live.contains(&id));
                        live.push(id);
                    }
                    Step::Remove(index) if !live.is_empty() => {
                        let id = live.remove(index % live.len());
                        prop_assert!(registry.remove(id).is_some());
                    }
                    Step::Remove(_) => {}
                }
                prop_assert_eq!(registry.len(), live.len());
            }
        }
    }
}
