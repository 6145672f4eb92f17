//! A trivial in-process [`Mapping`] backed by a `parking_lot::Mutex<HashMap>`.
//!
//! Concrete backends (filesystem, LMDB, zip, byte-transform) live outside
//! this crate; this is the minimal concrete `Mapping` every policy layer's
//! unit tests and doctests stack on top of, the same role `foyer-storage`'s
//! `NoneStore` plays as a baseline backend in that crate's own tests.

use ahash::RandomState;
use hashbrown::hash_map::Entry;
use kvstack_common::prelude::*;
use parking_lot::Mutex;

type HashMap<K, V> = hashbrown::HashMap<K, V, RandomState>;

/// An unbounded, single-process key/value store. Never evicts; every key
/// ever `put` stays resident until `delete`d or the mapping is closed.
pub struct MemoryMapping<K, V> {
    data: Mutex<HashMap<K, V>>,
    closed: std::sync::atomic::AtomicBool,
}

impl<K, V> Default for MemoryMapping<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> MemoryMapping<K, V> {
    pub fn new() -> Self {
        Self { data: Mutex::new(HashMap::default()), closed: std::sync::atomic::AtomicBool::new(false) }
    }

    fn check_open(&self) -> Result<(), K> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            Err(Error::AlreadyClosed)
        } else {
            Ok(())
        }
    }
}

impl<K: Key, V: Value> Mapping<K, V> for MemoryMapping<K, V> {
    fn get(&self, key: &K) -> Result<V, K> {
        self.check_open()?;
        self.data.lock().get(key).cloned().ok_or(Error::NotFound)
    }

    fn put(&self, key: K, value: V) -> Result<(), K> {
        self.check_open()?;
        self.data.lock().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<(), K> {
        self.check_open()?;
        match self.data.lock().entry(key.clone()) {
            Entry::Occupied(e) => {
                e.remove();
                Ok(())
            }
            Entry::Vacant(_) => Err(Error::NotFound),
        }
    }

    fn contains(&self, key: &K) -> bool {
        !self.closed.load(std::sync::atomic::Ordering::Acquire) && self.data.lock().contains_key(key)
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }

    fn keys(&self) -> Vec<K> {
        use itertools::Itertools;
        self.data.lock().keys().cloned().collect_vec()
    }

    fn close(&self) -> Result<(), K> {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        self.data.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_roundtrip() {
        let m: MemoryMapping<i32, i32> = MemoryMapping::new();
        m.put(1, 10).unwrap();
        assert_eq!(m.get(&1).unwrap(), 10);
        assert!(m.contains(&1));
        m.delete(&1).unwrap();
        assert!(!m.contains(&1));
        assert!(matches!(m.get(&1).unwrap_err(), Error::NotFound));
    }

    #[test]
    fn double_delete_is_not_found() {
        let m: MemoryMapping<&str, i32> = MemoryMapping::new();
        m.put("a", 1).unwrap();
        m.delete(&"a").unwrap();
        assert!(matches!(m.delete(&"a").unwrap_err(), Error::NotFound));
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_operations() {
        let m: MemoryMapping<i32, i32> = MemoryMapping::new();
        m.put(1, 1).unwrap();
        m.close().unwrap();
        m.close().unwrap();
        assert!(matches!(m.get(&1).unwrap_err(), Error::AlreadyClosed));
        assert!(matches!(m.put(2, 2).unwrap_err(), Error::AlreadyClosed));
    }
}
