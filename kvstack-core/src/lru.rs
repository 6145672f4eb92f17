//! A weight-bounded recency policy over one child mapping.
//!
//! The shape follows `foyer_memory::generic::CacheShard`: a single
//! `parking_lot::Mutex` guards the bookkeeping (`order`, `weight_by_key`,
//! `heavy`, `evicting_now`), the lock is dropped before any call that may
//! block on the child mapping or run a user callback, and is reacquired to
//! commit the result — "Locking discipline" in the crate's concurrency
//! model.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use ahash::RandomState;
use kvstack_common::prelude::*;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::insertion_sorted_set::InsertionSortedSet;

/// `ahash`-backed maps for the bookkeeping tables below.
type HashMap<K, V> = hashbrown::HashMap<K, V, RandomState>;
type HashSet<K> = hashbrown::HashSet<K, RandomState>;

/// Construction-time parameters for [`Lru`]. `n` and `offset` are also
/// exposed as runtime setters ([`Lru::set_n`], [`Lru::set_offset`]) since
/// both must stay mutable after construction.
pub struct LruConfig<W> {
    /// The weight budget. Eviction runs whenever `total_weight + offset >
    /// n`.
    pub n: i64,
    /// A runtime-adjustable overhead added to `total_weight` before
    /// comparing against `n`.
    pub offset: i64,
    /// `weight(key, value) -> non-negative weight`. Defaults to `1` per
    /// key via [`Lru::with_unit_weight`] if no meaningful weight exists.
    pub weight: W,
}

struct State<K> {
    n: i64,
    offset: i64,
    weight_by_key: HashMap<K, u64>,
    total_weight: u64,
    order: InsertionSortedSet<K>,
    heavy: HashSet<K>,
    /// Keys inserted through the normal, dirtying write path ([`Lru::put`]).
    /// A key evicted while *not* in this set was only ever cache-filled (see
    /// [`Lru::cache_put`]) and fires [`EvictListener::on_cache_evict`] on
    /// eviction instead of [`EvictListener::on_evict`] — §4.2's "Cache-
    /// eviction callbacks".
    dirty: HashSet<K>,
    closed_to_eviction: u32,
    evicting_now: HashSet<K>,
}

impl<K: Key> State<K> {
    fn over_budget(&self) -> bool {
        self.total_weight as i64 + self.offset > self.n
    }

    fn record(&mut self, key: K, weight: u64, dirty: bool) {
        if let Some(old) = self.weight_by_key.insert(key.clone(), weight) {
            self.total_weight -= old;
        }
        self.total_weight += weight;
        self.order.discard(&key);
        self.order.add(key.clone());
        if weight as i64 > self.n {
            self.heavy.insert(key.clone());
        } else {
            self.heavy.remove(&key);
        }
        if dirty {
            self.dirty.insert(key);
        } else {
            self.dirty.remove(&key);
        }
    }

    fn forget(&mut self, key: &K) {
        if let Some(w) = self.weight_by_key.remove(key) {
            self.total_weight -= w;
        }
        self.order.discard(key);
        self.heavy.remove(key);
        self.dirty.remove(key);
    }
}

/// A weight-bounded recency policy wrapping a child mapping `d`.
///
/// `Lru` is itself a [`Mapping`], so it composes: `Lru::new(memory_mapping,
/// ..)` is a ready-to-use bounded cache, and `Lru::new(another_policy_layer,
/// ..)` stacks it on top of anything else in this crate.
pub struct Lru<K, V, D, W> {
    d: D,
    weight: W,
    listeners: Vec<Arc<dyn EvictListener<K, V>>>,
    error_handler: Arc<dyn EvictErrorHandler<K, V>>,
    state: Mutex<State<K>>,
    evicted: Condvar,
    metrics: Metrics,
}

impl<K, V, D, W> Lru<K, V, D, W>
where
    K: Key,
    V: Value,
    D: Mapping<K, V>,
    W: Fn(&K, &V) -> u64 + Send + Sync + 'static,
{
    pub fn new(d: D, config: LruConfig<W>) -> Self {
        Self {
            d,
            weight: config.weight,
            listeners: Vec::new(),
            error_handler: Arc::new(PropagateEvictErrors),
            state: Mutex::new(State {
                n: config.n,
                offset: config.offset,
                weight_by_key: HashMap::default(),
                total_weight: 0,
                order: InsertionSortedSet::new(),
                heavy: HashSet::default(),
                dirty: HashSet::default(),
                closed_to_eviction: 0,
                evicting_now: HashSet::default(),
            }),
            evicted: Condvar::new(),
            metrics: Metrics::default(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn EvictListener<K, V>>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn EvictErrorHandler<K, V>>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn n(&self) -> i64 {
        self.state.lock().n
    }

    pub fn offset(&self) -> i64 {
        self.state.lock().offset
    }

    /// Reconfigure the weight budget, evicting immediately unless a
    /// [`Self::delay_eviction`] scope is open.
    pub fn set_n(&self, new_n: i64) -> Result<(), K> {
        let should_evict = {
            let mut state = self.state.lock();
            state.n = new_n;
            state.closed_to_eviction == 0
        };
        if should_evict {
            self.evict_until_below_target()
        } else {
            Ok(())
        }
    }

    /// Reconfigure the overhead offset, evicting immediately unless a
    /// [`Self::delay_eviction`] scope is open.
    pub fn set_offset(&self, new_offset: i64) -> Result<(), K> {
        let should_evict = {
            let mut state = self.state.lock();
            state.offset = new_offset;
            state.closed_to_eviction == 0
        };
        if should_evict {
            self.evict_until_below_target()
        } else {
            Ok(())
        }
    }

    /// Enter a delayed-eviction window: `put`/`set_n`/`set_offset` stop
    /// triggering eviction until every nested guard has been dropped, at
    /// which point eviction runs once as a batch.
    pub fn delay_eviction(&self) -> DelayedEviction<'_, K, V, D, W> {
        self.state.lock().closed_to_eviction += 1;
        DelayedEviction { lru: self }
    }

    /// Wait until `key` is no longer being evicted by a concurrent caller:
    /// a `put` racing an in-flight eviction of the same key waits for that
    /// eviction to finalize before proceeding.
    fn wait_while_evicting(&self, key: &K) {
        let mut state = self.state.lock();
        while state.evicting_now.contains(key) {
            self.evicted.wait(&mut state);
        }
    }

    /// Insert `key`/`value` as a read-through cache fill rather than a
    /// user write: the entry is tracked like any other for weight/recency
    /// purposes, but if it is later evicted without an intervening
    /// [`Mapping::put`], eviction fires [`EvictListener::on_cache_evict`]
    /// instead of [`EvictListener::on_evict`] (§4.2). Typical use is as the
    /// `cache` argument to [`crate::cache::Cache`]: a miss-fill is "not
    /// dirty" because it merely mirrors data that still lives in the
    /// backing mapping, so dropping it silently on eviction is fine.
    pub fn cache_put(&self, key: K, value: V) -> Result<(), K> {
        self.wait_while_evicting(&key);
        let weight = (self.weight)(&key, &value);
        self.d.put(key.clone(), value)?;
        let should_evict = {
            let mut state = self.state.lock();
            state.record(key.clone(), weight, false);
            state.closed_to_eviction == 0
        };
        self.metrics.insert.fetch_add(1, Relaxed);
        if should_evict {
            self.evict_until_below_target_excluding(Some(&key))
        } else {
            Ok(())
        }
    }

    /// Atomically fetch every key in `keys`, bumping recency for each one
    /// (in `keys` order) only if every key was present. On any miss,
    /// returns [`Error::NotFoundAny`] with the full missing set and leaves
    /// recency untouched for every key, including the ones that did hit.
    pub fn get_all_or_nothing(&self, keys: &[K]) -> Result<HashMap<K, V>, K> {
        let mut hits = Vec::with_capacity(keys.len());
        let mut missing = std::collections::HashSet::new();
        for key in keys {
            match self.d.get(key) {
                Ok(value) => hits.push((key.clone(), value)),
                Err(Error::NotFound) => {
                    missing.insert(key.clone());
                }
                Err(e) => return Err(e),
            }
        }
        if !missing.is_empty() {
            return Err(Error::NotFoundAny(missing));
        }
        let mut state = self.state.lock();
        for key in keys {
            state.order.discard(key);
            state.order.add(key.clone());
        }
        drop(state);
        Ok(hits.into_iter().collect())
    }

    /// Run eviction until back under budget, or until nothing more can be
    /// evicted.
    ///
    /// `exclude` names a key that must not itself be chosen as a victim on
    /// this pass — used by [`Self::put`]/[`Self::cache_put`] to exempt the
    /// key they just inserted from their own triggering eviction pass, so a
    /// heavy key lands in `heavy` and survives the very `put` that made it
    /// heavy (§8 scenario 2: "`big` lands in `heavy` and is evicted on the
    /// next insertion even if it's the most recent"), rather than being
    /// evicted before the call that inserted it even returns. The exemption
    /// is scoped to this one call: a *later* `put`/`cache_put`'s own pass
    /// evicts the previously-exempted key immediately if it is still the
    /// chosen victim.
    fn evict_until_below_target(&self) -> Result<(), K> {
        self.evict_until_below_target_excluding(None)
    }

    fn evict_until_below_target_excluding(&self, exclude: Option<&K>) -> Result<(), K> {
        loop {
            let (victim, dirty) = {
                let mut state = self.state.lock();
                if !state.over_budget() {
                    return Ok(());
                }
                if state.weight_by_key.len() <= 1 {
                    // A single key whose own weight alone exceeds `n` is kept
                    // resident best-effort rather than evicted.
                    return Ok(());
                }
                let evictable = |k: &&K| !state.evicting_now.contains(*k) && Some(*k) != exclude;
                let candidate = state
                    .heavy
                    .iter()
                    .find(evictable)
                    .cloned()
                    .or_else(|| state.order.iter().find(evictable).cloned());
                let Some(victim) = candidate else {
                    // Every evictable key is already being evicted elsewhere, is
                    // exempted as the key this very call just inserted, or the
                    // only resident key is over budget alone: a lone heavy key
                    // stays resident best-effort rather than evicted.
                    return Ok(());
                };
                let dirty = state.dirty.contains(&victim);
                state.evicting_now.insert(victim.clone());
                (victim, dirty)
            };

            let value = match self.d.get(&victim) {
                Ok(value) => value,
                Err(_) => {
                    // Vanished underneath us (e.g. raced with an external delete).
                    let mut state = self.state.lock();
                    state.evicting_now.remove(&victim);
                    state.forget(&victim);
                    self.evicted.notify_all();
                    continue;
                }
            };

            if dirty {
                let mut failure = None;
                for listener in &self.listeners {
                    if let Err(e) = listener.on_evict(&victim, &value) {
                        failure = Some(e);
                        break;
                    }
                }

                if let Some(err) = failure {
                    let suppress = self.error_handler.on_evict_error(&victim, &value, &err);
                    if !suppress {
                        warn!(?err, "eviction callback failed and was not suppressed; key remains resident");
                        let mut state = self.state.lock();
                        state.evicting_now.remove(&victim);
                        self.evicted.notify_all();
                        return Err(Error::CallbackFailure(err));
                    }
                }
            } else {
                // Never dirtied: a pure cache drop, not a demotion/flush. Fires the
                // infallible observer instead of the fallible write-back hook.
                for listener in &self.listeners {
                    listener.on_cache_evict(&victim, &value);
                }
            }

            let _ = self.d.delete(&victim);
            {
                let mut state = self.state.lock();
                state.evicting_now.remove(&victim);
                state.forget(&victim);
            }
            self.evicted.notify_all();
            self.metrics.evict.fetch_add(1, Relaxed);
            debug!(?victim, "evicted");
        }
    }
}

impl<K, V, D> Lru<K, V, D, fn(&K, &V) -> u64>
where
    K: Key,
    V: Value,
    D: Mapping<K, V>,
{
    /// Convenience constructor for the common case of counting entries
    /// rather than weighing them: `weight(_, _) = 1`.
    pub fn with_unit_weight(d: D, n: i64) -> Self {
        Self::new(d, LruConfig { n, offset: 0, weight: |_: &K, _: &V| 1 })
    }
}

impl<K, V, D, W> Mapping<K, V> for Lru<K, V, D, W>
where
    K: Key,
    V: Value,
    D: Mapping<K, V>,
    W: Fn(&K, &V) -> u64 + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<V, K> {
        let value = self.d.get(key)?;
        let mut state = self.state.lock();
        state.order.discard(key);
        state.order.add(key.clone());
        drop(state);
        self.metrics.hit.fetch_add(1, Relaxed);
        Ok(value)
    }

    fn put(&self, key: K, value: V) -> Result<(), K> {
        self.wait_while_evicting(&key);
        let weight = (self.weight)(&key, &value);
        self.d.put(key.clone(), value)?;
        let should_evict = {
            let mut state = self.state.lock();
            state.record(key.clone(), weight, true);
            state.closed_to_eviction == 0
        };
        self.metrics.insert.fetch_add(1, Relaxed);
        if should_evict {
            self.evict_until_below_target_excluding(Some(&key))
        } else {
            Ok(())
        }
    }

    fn delete(&self, key: &K) -> Result<(), K> {
        self.d.delete(key)?;
        self.state.lock().forget(key);
        self.metrics.remove.fetch_add(1, Relaxed);
        Ok(())
    }

    fn contains(&self, key: &K) -> bool {
        self.d.contains(key)
    }

    fn len(&self) -> usize {
        self.d.len()
    }

    fn keys(&self) -> Vec<K> {
        self.d.keys()
    }

    fn close(&self) -> Result<(), K> {
        self.d.close()
    }
}

/// RAII guard returned by [`Lru::delay_eviction`]. Dropping the last
/// outstanding guard runs one eviction pass.
pub struct DelayedEviction<'a, K, V, D, W> {
    lru: &'a Lru<K, V, D, W>,
}

impl<K, V, D, W> Drop for DelayedEviction<'_, K, V, D, W>
where
    K: Key,
    V: Value,
    D: Mapping<K, V>,
    W: Fn(&K, &V) -> u64 + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let should_evict = {
            let mut state = self.lru.state.lock();
            state.closed_to_eviction -= 1;
            state.closed_to_eviction == 0
        };
        if should_evict {
            if let Err(err) = self.lru.evict_until_below_target() {
                warn!(?err, "eviction on delayed-eviction scope exit failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use kvstack_common::error::CallbackError;

    use super::*;
    use crate::memory_mapping::MemoryMapping;

    fn unit_lru(n: i64) -> Lru<i32, i32, MemoryMapping<i32, i32>, fn(&i32, &i32) -> u64> {
        Lru::with_unit_weight(MemoryMapping::new(), n)
    }

    #[test]
    fn eviction_order_is_least_recently_used() {
        let lru = unit_lru(3);
        lru.put(1, 1).unwrap(); // a=1
        lru.put(2, 2).unwrap(); // b=2
        lru.put(3, 3).unwrap(); // c=3
        assert_eq!(lru.get(&1).unwrap(), 1); // touch a
        lru.put(4, 4).unwrap(); // d=4, evicts b
        assert!(lru.contains(&1));
        assert!(!lru.contains(&2));
        assert!(lru.contains(&3));
        assert!(lru.contains(&4));
    }

    #[test]
    fn heavy_key_is_evicted_first_but_survives_alone() {
        let lru = Lru::new(
            MemoryMapping::new(),
            LruConfig { n: 3, offset: 0, weight: |_: &i32, v: &i32| *v as u64 },
        );
        lru.put(1, 1).unwrap();
        lru.put(2, 1).unwrap();
        lru.put(3, 1).unwrap();
        lru.put(100, 5).unwrap(); // "big": weight 5 > n=3
        assert!(lru.contains(&100));
        // Inserting again evicts `big` first even though it is the most recent.
        lru.put(200, 1).unwrap();
        assert!(!lru.contains(&100));
    }

    #[test_log::test]
    fn callback_failure_suppressed_by_error_handler_still_evicts() {
        struct FailingListener;
        impl EvictListener<i32, i32> for FailingListener {
            fn on_evict(&self, _key: &i32, _value: &i32) -> Result<(), CallbackError> {
                Err("disk full".into())
            }
        }
        struct AlwaysSuppress;
        impl EvictErrorHandler<i32, i32> for AlwaysSuppress {
            fn on_evict_error(&self, _key: &i32, _value: &i32, _error: &CallbackError) -> bool {
                true
            }
        }

        let lru = Lru::new(MemoryMapping::new(), LruConfig { n: 1, offset: 0, weight: |_: &i32, _: &i32| 1 })
            .with_listener(Arc::new(FailingListener))
            .with_error_handler(Arc::new(AlwaysSuppress));

        lru.put(1, 1).unwrap();
        lru.put(2, 2).unwrap(); // evicts 1 despite the failing listener
        assert!(!lru.contains(&1));
        assert!(lru.contains(&2));
    }

    #[test_log::test]
    fn callback_failure_not_suppressed_leaves_key_resident() {
        struct FailingListener;
        impl EvictListener<i32, i32> for FailingListener {
            fn on_evict(&self, _key: &i32, _value: &i32) -> Result<(), CallbackError> {
                Err("disk full".into())
            }
        }

        let lru = Lru::new(MemoryMapping::new(), LruConfig { n: 1, offset: 0, weight: |_: &i32, _: &i32| 1 })
            .with_listener(Arc::new(FailingListener));

        lru.put(1, 1).unwrap();
        let err = lru.put(2, 2).unwrap_err();
        assert!(matches!(err, Error::CallbackFailure(_)));
        // Both keys remain resident: `d` never had `1` removed.
        assert!(lru.contains(&1));
        assert!(lru.contains(&2));
    }

    #[test]
    fn delayed_eviction_batches_callbacks() {
        let evicted = Arc::new(AtomicUsize::new(0));

        struct CountingListener(Arc<AtomicUsize>);
        impl EvictListener<i32, i32> for CountingListener {
            fn on_evict(&self, _key: &i32, _value: &i32) -> Result<(), CallbackError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let lru = Lru::new(MemoryMapping::new(), LruConfig { n: 2, offset: 0, weight: |_: &i32, _: &i32| 1 })
            .with_listener(Arc::new(CountingListener(evicted.clone())));

        lru.put(1, 1).unwrap();
        lru.put(2, 2).unwrap();

        {
            let _guard = lru.delay_eviction();
            lru.put(3, 3).unwrap();
            lru.put(4, 4).unwrap();
            assert_eq!(evicted.load(Ordering::SeqCst), 0, "no eviction fires inside the scope");
        }

        assert_eq!(evicted.load(Ordering::SeqCst), 2, "both overdue evictions fire on scope exit");
        assert!(lru.contains(&3));
        assert!(lru.contains(&4));
        assert!(!lru.contains(&1));
        assert!(!lru.contains(&2));
    }

    #[test]
    fn get_all_or_nothing_success_bumps_recency_in_request_order() {
        let lru = unit_lru(10);
        lru.put("x", 1).unwrap();
        lru.put("y", 2).unwrap();
        lru.put("z", 3).unwrap();

        let result = lru.get_all_or_nothing(&["z", "x"]).unwrap();
        assert_eq!(result.get("z"), Some(&3));
        assert_eq!(result.get("x"), Some(&1));

        let order: Vec<_> = lru.state.lock().order.iter().cloned().collect();
        assert_eq!(order, vec!["y", "z", "x"]);
    }

    #[test]
    fn get_all_or_nothing_failure_leaves_order_untouched() {
        let lru = unit_lru(10);
        lru.put("x", 1).unwrap();
        lru.put("y", 2).unwrap();
        lru.put("z", 3).unwrap();

        let before: Vec<_> = lru.state.lock().order.iter().cloned().collect();
        let err = lru.get_all_or_nothing(&["x", "missing"]).unwrap_err();
        assert!(matches!(err, Error::NotFoundAny(_)));
        let after: Vec<_> = lru.state.lock().order.iter().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn cache_put_fires_on_cache_evict_instead_of_on_evict() {
        struct Observer {
            evicted: Arc<AtomicUsize>,
            cache_evicted: Arc<AtomicUsize>,
        }
        impl EvictListener<i32, i32> for Observer {
            fn on_evict(&self, _key: &i32, _value: &i32) -> Result<(), CallbackError> {
                self.evicted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn on_cache_evict(&self, _key: &i32, _value: &i32) {
                self.cache_evicted.fetch_add(1, Ordering::SeqCst);
            }
        }

        let evicted = Arc::new(AtomicUsize::new(0));
        let cache_evicted = Arc::new(AtomicUsize::new(0));
        let lru = unit_lru(1).with_listener(Arc::new(Observer { evicted: evicted.clone(), cache_evicted: cache_evicted.clone() }));

        lru.cache_put(1, 1).unwrap(); // a cache fill, not a write
        lru.cache_put(2, 2).unwrap(); // evicts 1 via on_cache_evict
        assert_eq!(cache_evicted.load(Ordering::SeqCst), 1);
        assert_eq!(evicted.load(Ordering::SeqCst), 0);

        lru.put(2, 20).unwrap(); // a real write to the still-resident key 2: dirties it
        lru.put(3, 3).unwrap(); // evicts 2, now dirty, via on_evict
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
        assert_eq!(cache_evicted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn total_weight_matches_sum_of_weight_by_key_at_every_boundary() {
        let lru = unit_lru(5);
        for i in 0..5 {
            lru.put(i, i).unwrap();
            let state = lru.state.lock();
            let sum: u64 = state.weight_by_key.values().sum();
            assert_eq!(state.total_weight, sum);
        }
    }
}
