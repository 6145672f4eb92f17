//! Key-routed fan-out across N child mappings.
//!
//! Every operation on key `k` dispatches to `mappings[selector(k)]`. Unlike
//! the other layers, `Sieve` holds no bookkeeping of its own beyond the
//! child table and the selector: it is pure routing, the same role
//! `foyer_storage`'s device-selection layer plays for sharding writes
//! across multiple physical devices, minus the rebalancing.

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

use hashbrown::HashMap;
use kvstack_common::prelude::*;

/// Routes operations on key `k` to `mappings[selector(k)]`.
///
/// If `selector(k)` returns a different label for a key already resident
/// under an earlier label, behavior is undefined — this
/// implementation does not track relocation, so the stale child keeps
/// answering for `k` until it is deleted and reinserted under the new
/// label. No test in this crate asserts a particular outcome for that case.
pub struct Sieve<K, V, M, L, Sel> {
    mappings: HashMap<L, M>,
    selector: Sel,
    closed: AtomicBool,
    _marker: std::marker::PhantomData<fn(&K, &V)>,
}

impl<K, V, M, L, Sel> Sieve<K, V, M, L, Sel>
where
    K: Key,
    V: Value,
    M: Mapping<K, V>,
    L: std::hash::Hash + Eq + Clone,
    Sel: Fn(&K) -> L + Send + Sync + 'static,
{
    pub fn new(mappings: impl IntoIterator<Item = (L, M)>, selector: Sel) -> Self {
        Self {
            mappings: mappings.into_iter().collect(),
            selector,
            closed: AtomicBool::new(false),
            _marker: std::marker::PhantomData,
        }
    }

    fn route(&self, key: &K) -> Result<&M, K> {
        let label = (self.selector)(key);
        self.mappings.get(&label).ok_or_else(|| {
            Error::ConfigurationError("selector produced a label with no registered mapping".to_string())
        })
    }

    fn check_open(&self) -> Result<(), K> {
        if self.closed.load(Relaxed) {
            Err(Error::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    /// Direct access to a child mapping by label, e.g. for inspecting a
    /// specific backend in tests or admin tooling.
    pub fn child(&self, label: &L) -> Option<&M> {
        self.mappings.get(label)
    }
}

impl<K, V, M, L, Sel> Mapping<K, V> for Sieve<K, V, M, L, Sel>
where
    K: Key,
    V: Value,
    M: Mapping<K, V>,
    L: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    Sel: Fn(&K) -> L + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<V, K> {
        self.check_open()?;
        self.route(key)?.get(key)
    }

    fn put(&self, key: K, value: V) -> Result<(), K> {
        self.check_open()?;
        self.route(&key)?.put(key, value)
    }

    fn delete(&self, key: &K) -> Result<(), K> {
        self.check_open()?;
        self.route(key)?.delete(key)
    }

    fn contains(&self, key: &K) -> bool {
        if self.closed.load(Relaxed) {
            return false;
        }
        match self.route(key) {
            Ok(child) => child.contains(key),
            Err(_) => false,
        }
    }

    fn len(&self) -> usize {
        self.mappings.values().map(|m| m.len()).sum()
    }

    fn keys(&self) -> Vec<K> {
        self.mappings.values().flat_map(|m| m.keys()).collect()
    }

    fn close(&self) -> Result<(), K> {
        self.closed.store(true, Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_mapping::MemoryMapping;

    fn even_odd_sieve() -> Sieve<i32, i32, MemoryMapping<i32, i32>, &'static str, fn(&i32) -> &'static str> {
        let mut mappings = HashMap::new();
        mappings.insert("even", MemoryMapping::new());
        mappings.insert("odd", MemoryMapping::new());
        Sieve::new(mappings, |k: &i32| if k % 2 == 0 { "even" } else { "odd" })
    }

    #[test]
    fn routes_to_the_selected_child() {
        let sieve = even_odd_sieve();
        sieve.put(2, 20).unwrap();
        sieve.put(3, 30).unwrap();

        assert_eq!(sieve.child(&"even").unwrap().get(&2).unwrap(), 20);
        assert_eq!(sieve.child(&"odd").unwrap().get(&3).unwrap(), 30);
        assert!(!sieve.child(&"even").unwrap().contains(&3));
    }

    #[test]
    fn len_and_keys_sum_across_children() {
        let sieve = even_odd_sieve();
        for i in 0..6 {
            sieve.put(i, i * 10).unwrap();
        }
        assert_eq!(sieve.len(), 6);
        let mut keys = sieve.keys();
        keys.sort();
        assert_eq!(keys, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn unmapped_label_surfaces_as_configuration_error() {
        let mappings: HashMap<&'static str, MemoryMapping<i32, i32>> = HashMap::new();
        let sieve = Sieve::new(mappings, |_: &i32| "nowhere");
        assert!(matches!(sieve.put(1, 1).unwrap_err(), Error::ConfigurationError(_)));
    }
}
