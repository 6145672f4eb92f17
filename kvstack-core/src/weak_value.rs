//! A mapping whose values are retained only by weak reference.
//!
//! Rust has native weak references, so this uses `std::sync::Weak` directly
//! rather than a periodic sweep over external liveness markers: a key is
//! live exactly as long as some other `Arc`
//! holds its value, and `get`/`contains` check liveness on the spot. `len`
//! and `keys` still sweep dead entries first, but that sweep is itself
//! best-effort — a value can be dropped by another thread immediately
//! after the count is taken, so `len` is best-effort too.

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use kvstack_common::prelude::*;
use parking_lot::Mutex;

/// A mapping over `Arc<T>` values that does not keep them alive itself: a
/// key vanishes once every other strong reference to its value has been
/// dropped. Typically used as the `cache` argument to [`crate::cache::Cache`]
/// when memory pressure, not an explicit bound, should regulate the working
/// set.
pub struct WeakValueMapping<K, T> {
    entries: Mutex<HashMap<K, Weak<T>>>,
    closed: AtomicBool,
}

impl<K, T> Default for WeakValueMapping<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> WeakValueMapping<K, T> {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()), closed: AtomicBool::new(false) }
    }
}

impl<K: Key, T: Send + Sync + 'static> WeakValueMapping<K, T> {
    fn check_open(&self) -> Result<(), K> {
        if self.closed.load(Relaxed) {
            Err(Error::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn sweep(entries: &mut HashMap<K, Weak<T>>) {
        entries.retain(|_, weak| weak.strong_count() > 0);
    }
}

impl<K: Key, T: Send + Sync + 'static> Mapping<K, Arc<T>> for WeakValueMapping<K, T> {
    fn get(&self, key: &K) -> Result<Arc<T>, K> {
        self.check_open()?;
        let mut entries = self.entries.lock();
        let live = entries.get(key).and_then(|w| w.upgrade());
        match live {
            Some(v) => Ok(v),
            None => {
                entries.remove(key);
                Err(Error::NotFound)
            }
        }
    }

    fn put(&self, key: K, value: Arc<T>) -> Result<(), K> {
        self.check_open()?;
        self.entries.lock().insert(key, Arc::downgrade(&value));
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<(), K> {
        self.check_open()?;
        match self.entries.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound),
        }
    }

    fn contains(&self, key: &K) -> bool {
        if self.closed.load(Relaxed) {
            return false;
        }
        self.entries.lock().get(key).map(|w| w.strong_count() > 0).unwrap_or(false)
    }

    fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        Self::sweep(&mut entries);
        entries.len()
    }

    fn keys(&self) -> Vec<K> {
        let mut entries = self.entries.lock();
        Self::sweep(&mut entries);
        entries.keys().cloned().collect()
    }

    fn close(&self) -> Result<(), K> {
        self.closed.store(true, Relaxed);
        self.entries.lock().clear();
        Ok(())
    }
}
