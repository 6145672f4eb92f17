//! A read-through cache over a (possibly expensive) backing mapping.
//!
//! `Cache` itself stores nothing: it consults `cache` first, falls back to
//! `d` on a miss and populates `cache` with the result, and keeps `cache`
//! coherent with writes either by updating it in place (`update_on_set`) or
//! invalidating the stale entry. Pairing this with
//! [`crate::weak_value::WeakValueMapping`] as the `cache` argument gives a
//! cache whose size is regulated by live references elsewhere rather than
//! an explicit bound.

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

use kvstack_common::prelude::*;
use tracing::debug;

/// A read-through cache: `get` consults `cache` before `d`; `put`/`delete`
/// always go to `d` first, then keep `cache` coherent per `update_on_set`.
pub struct Cache<K, V, D, C> {
    d: D,
    cache: C,
    update_on_set: bool,
    propagate_close: bool,
    metrics: Metrics,
    closed: AtomicBool,
    _marker: std::marker::PhantomData<fn(&K, &V)>,
}

impl<K, V, D, C> Cache<K, V, D, C>
where
    K: Key,
    V: Value,
    D: Mapping<K, V>,
    C: Mapping<K, V>,
{
    /// `update_on_set`: if true, a `put` also refreshes `cache` with the
    /// new value; if false, a `put` invalidates the key in `cache` instead.
    pub fn new(d: D, cache: C, update_on_set: bool) -> Self {
        Self {
            d,
            cache,
            update_on_set,
            propagate_close: false,
            metrics: Metrics::default(),
            closed: AtomicBool::new(false),
            _marker: std::marker::PhantomData,
        }
    }

    /// Policy layers do not own their children's lifetime by default;
    /// `Cache` is the exception, and only when this is opted into.
    pub fn propagating_close(mut self) -> Self {
        self.propagate_close = true;
        self
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn check_open(&self) -> Result<(), K> {
        if self.closed.load(Relaxed) {
            Err(Error::AlreadyClosed)
        } else {
            Ok(())
        }
    }
}

impl<K, V, D, C> Mapping<K, V> for Cache<K, V, D, C>
where
    K: Key,
    V: Value,
    D: Mapping<K, V>,
    C: Mapping<K, V>,
{
    fn get(&self, key: &K) -> Result<V, K> {
        self.check_open()?;
        match self.cache.get(key) {
            Ok(v) => {
                self.metrics.hit.fetch_add(1, Relaxed);
                return Ok(v);
            }
            Err(Error::NotFound) => {}
            Err(e) => return Err(e),
        }
        let value = self.d.get(key)?;
        self.metrics.miss.fetch_add(1, Relaxed);
        if let Err(err) = self.cache.put(key.clone(), value.clone()) {
            debug!(?err, "populating the read-through cache failed; serving the value anyway");
        }
        Ok(value)
    }

    fn put(&self, key: K, value: V) -> Result<(), K> {
        self.check_open()?;
        self.d.put(key.clone(), value.clone())?;
        if self.update_on_set {
            let _ = self.cache.put(key, value);
        } else {
            match self.cache.delete(&key) {
                Ok(()) | Err(Error::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        self.metrics.insert.fetch_add(1, Relaxed);
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<(), K> {
        self.check_open()?;
        self.d.delete(key)?;
        match self.cache.delete(key) {
            Ok(()) | Err(Error::NotFound) => {}
            Err(e) => return Err(e),
        }
        self.metrics.remove.fetch_add(1, Relaxed);
        Ok(())
    }

    fn contains(&self, key: &K) -> bool {
        !self.closed.load(Relaxed) && (self.cache.contains(key) || self.d.contains(key))
    }

    fn len(&self) -> usize {
        self.d.len()
    }

    fn keys(&self) -> Vec<K> {
        self.d.keys()
    }

    fn close(&self) -> Result<(), K> {
        self.closed.store(true, Relaxed);
        if self.propagate_close {
            self.cache.close()?;
            self.d.close()?;
        }
        Ok(())
    }
}
