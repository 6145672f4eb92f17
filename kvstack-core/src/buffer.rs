//! A two-tier `fast`/`slow` mapping driven by an internal [`Lru`].
//!
//! `fast` is wrapped by an `Lru(n, fast)` whose eviction listener writes the
//! evictee to `slow` and lets the `Lru` delete it from `fast` as normal.
//! Promotion (a `slow` hit moving a key back into `fast`) is the one thing
//! the `Lru` cannot do by itself, so `Buffer` implements it directly,
//! guarding the two-tier move with its own lock: the promotion's
//! write-to-fast happens first, under the buffer lock, before any
//! concurrent writer is let through.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

use kvstack_common::prelude::*;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::lru::{Lru, LruConfig};

/// The mandatory demotion listener every `Buffer` registers on its internal
/// `Lru`: when the `Lru` evicts a key from `fast`, this writes it into
/// `slow` before the `Lru` deletes it from `fast`. Any listeners the caller
/// supplies via [`Buffer::with_fast_to_slow_listener`] run after this one,
/// as pure observers of the demotion, not responsible for the move itself.
struct DemotionListener<K, V, S> {
    slow: Arc<S>,
    _marker: std::marker::PhantomData<fn(K, V)>,
}

impl<K, V, S> EvictListener<K, V> for DemotionListener<K, V, S>
where
    K: Key,
    V: Value,
    S: Mapping<K, V> + 'static,
{
    fn on_evict(&self, key: &K, value: &V) -> std::result::Result<(), CallbackError> {
        self.slow.put(key.clone(), value.clone()).map_err(|e| -> CallbackError { Box::new(DemotionFailed(e.to_string())) })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("writing the demoted entry into the slow tier failed: {0}")]
struct DemotionFailed(String);

/// A two-tier mapping: `fast` is capacity-bounded by an internal `Lru`,
/// overflow demotes to `slow`, and a `slow`-tier hit promotes back into
/// `fast`. Invariant: `fast.keys` and `slow.keys` are always disjoint.
pub struct Buffer<K, V, F, S, W> {
    lru: Lru<K, V, Arc<F>, W>,
    slow: Arc<S>,
    promoting: Mutex<HashSet<K>>,
    promoted: Condvar,
    slow_to_fast: Vec<Arc<dyn PromoteListener<K, V>>>,
    metrics: Metrics,
    closed: AtomicBool,
}

impl<K, V, F, S, W> Buffer<K, V, F, S, W>
where
    K: Key,
    V: Value,
    F: Mapping<K, V> + 'static,
    S: Mapping<K, V> + 'static,
    W: Fn(&K, &V) -> u64 + Send + Sync + 'static,
{
    pub fn new(fast: F, slow: S, n: i64, weight: W) -> Self {
        let slow = Arc::new(slow);
        let lru = Lru::new(Arc::new(fast), LruConfig { n, offset: 0, weight })
            .with_listener(Arc::new(DemotionListener { slow: slow.clone(), _marker: std::marker::PhantomData }));
        Self {
            lru,
            slow,
            promoting: Mutex::new(HashSet::new()),
            promoted: Condvar::new(),
            slow_to_fast: Vec::new(),
            metrics: Metrics::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Register an extra observer fired (in addition to the mandatory
    /// demotion write) whenever a key moves from `fast` to `slow`.
    pub fn with_fast_to_slow_listener(mut self, listener: Arc<dyn EvictListener<K, V>>) -> Self {
        self.lru = self.lru.with_listener(listener);
        self
    }

    /// Register an observer fired whenever a key is promoted from `slow`
    /// back into `fast` on a read hit.
    pub fn with_slow_to_fast_listener(mut self, listener: Arc<dyn PromoteListener<K, V>>) -> Self {
        self.slow_to_fast.push(listener);
        self
    }

    pub fn n(&self) -> i64 {
        self.lru.n()
    }

    pub fn offset(&self) -> i64 {
        self.lru.offset()
    }

    pub fn set_n(&self, n: i64) -> Result<(), K> {
        self.lru.set_n(n)
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

    /// Block until no promotion of `key` is in flight. A concurrent `put`
    /// waits here before writing, so the writer's value always wins: the
    /// promotion's stale write-to-fast always lands first.
    fn wait_while_promoting(&self, key: &K) {
        let mut promoting = self.promoting.lock();
        while promoting.contains(key) {
            self.promoted.wait(&mut promoting);
        }
    }

    fn promote(&self, key: &K) -> Result<V, K> {
        {
            let mut promoting = self.promoting.lock();
            while promoting.contains(key) {
                self.promoted.wait(&mut promoting);
            }
            promoting.insert(key.clone());
        }
        let result = (|| {
            let value = self.slow.get(key)?;
            self.lru.put(key.clone(), value.clone())?;
            // Best-effort: if another thread already promoted/evicted this key
            // concurrently, the delete below may legitimately miss; that is not
            // an error for the reader that already has `value` in hand.
            let _ = self.slow.delete(key);
            self.metrics.promote.fetch_add(1, Relaxed);
            debug!(?key, "promoted fast<-slow");
            Ok(value)
        })();
        {
            let mut promoting = self.promoting.lock();
            promoting.remove(key);
        }
        self.promoted.notify_all();
        result
    }
}

impl<K, V, F, S, W> Mapping<K, V> for Buffer<K, V, F, S, W>
where
    K: Key,
    V: Value,
    F: Mapping<K, V> + 'static,
    S: Mapping<K, V> + 'static,
    W: Fn(&K, &V) -> u64 + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<V, K> {
        self.check_open()?;
        self.wait_while_promoting(key);
        match self.lru.get(key) {
            Ok(v) => return Ok(v),
            Err(Error::NotFound) => {}
            Err(e) => return Err(e),
        }
        match self.promote(key) {
            Ok(v) => {
                for listener in &self.slow_to_fast {
                    listener.on_promote(key, &v);
                }
                Ok(v)
            }
            Err(e) => Err(e),
        }
    }

    fn put(&self, key: K, value: V) -> Result<(), K> {
        self.check_open()?;
        self.wait_while_promoting(&key);
        self.lru.put(key, value)
    }

    fn delete(&self, key: &K) -> Result<(), K> {
        self.check_open()?;
        self.wait_while_promoting(key);
        match self.lru.delete(key) {
            Ok(()) => {
                let _ = self.slow.delete(key);
                Ok(())
            }
            Err(Error::NotFound) => self.slow.delete(key),
            Err(e) => Err(e),
        }
    }

    fn contains(&self, key: &K) -> bool {
        !self.closed.load(Relaxed) && (self.lru.contains(key) || self.slow.contains(key))
    }

    fn len(&self) -> usize {
        self.lru.len() + self.slow.len()
    }

    fn keys(&self) -> Vec<K> {
        let mut keys = self.lru.keys();
        keys.extend(self.slow.keys());
        keys
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

    fn unit_buffer(n: i64) -> Buffer<i32, i32, MemoryMapping<i32, i32>, MemoryMapping<i32, i32>, fn(&i32, &i32) -> u64> {
        Buffer::new(MemoryMapping::new(), MemoryMapping::new(), n, |_: &i32, _: &i32| 1)
    }

    #[test_log::test]
    fn put_overflow_demotes_to_slow_then_promotes_on_read() {
        let buf = unit_buffer(2);
        buf.put(1, 1).unwrap(); // a
        buf.put(2, 2).unwrap(); // b
        buf.put(3, 3).unwrap(); // c -> demotes a to slow

        assert!(!buf.lru.contains(&1));
        assert!(buf.slow.contains(&1));

        let v = buf.get(&1).unwrap();
        assert_eq!(v, 1);
        assert!(buf.lru.contains(&1));
        assert!(!buf.slow.contains(&1));
        // exactly one of {b, c} demoted to make room for the promotion
        assert_eq!(buf.lru.len() + buf.slow.len(), 3);
    }

    #[test]
    fn fast_and_slow_keys_are_disjoint() {
        let buf = unit_buffer(1);
        for i in 0..5 {
            buf.put(i, i).unwrap();
        }
        let fast: HashSet<_> = buf.lru.keys().into_iter().collect();
        let slow: HashSet<_> = buf.slow.keys().into_iter().collect();
        assert!(fast.is_disjoint(&slow));
        assert_eq!(fast.len() + slow.len(), 5);
    }

    #[test]
    fn delete_removes_from_whichever_tier_holds_the_key() {
        let buf = unit_buffer(1);
        buf.put(1, 1).unwrap();
        buf.put(2, 2).unwrap(); // demotes 1 to slow
        assert!(buf.slow.contains(&1));
        buf.delete(&1).unwrap();
        assert!(!buf.contains(&1));
        assert!(matches!(buf.delete(&1).unwrap_err(), Error::NotFound));
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_access() {
        let buf = unit_buffer(2);
        buf.put(1, 1).unwrap();
        buf.close().unwrap();
        buf.close().unwrap();
        assert!(matches!(buf.get(&1).unwrap_err(), Error::AlreadyClosed));
    }
}
