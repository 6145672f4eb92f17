//! A [`crate::buffer::Buffer`] variant whose demotions run on a
//! background executor instead of inline with the triggering `put`.
//!
//! The demotion listener registered on the internal `Lru` no longer writes
//! `slow` itself: it marks the key "pending", hands the write off to a
//! [`DemotionExecutor`], and returns immediately so the `Lru` can finish
//! deleting the key from `fast` without blocking the caller on slow-tier
//! I/O. Readers of that specific key block (synchronously via
//! [`Mapping::get`], or by awaiting via [`AsyncBuffer::async_get`]) until
//! the pending write resolves; reads of unrelated keys are never affected.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use kvstack_common::prelude::*;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::lru::{Lru, LruConfig};

/// A boxed, owned, `'static` future — the shape `foyer-memory`'s
/// `tokio::task::JoinHandle`-returning APIs are built around, abstracted so
/// callers are not tied to a specific runtime.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What happened to a submitted demotion task.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("demotion task was cancelled")]
    Cancelled,
    #[error("demotion task panicked: {0}")]
    Panicked(String),
}

/// A task submitter that returns a future and a way to await that future.
/// The target is free to back this with a thread pool, a
/// cooperative runtime, or anything else that can run a future to
/// completion independently of the calling thread.
pub trait DemotionExecutor: Send + Sync + 'static {
    /// Submit `task` for execution. The returned future resolves once
    /// `task` has run to completion, failed, or been cancelled.
    fn spawn(&self, task: BoxFuture<'static, ()>) -> BoxFuture<'static, Result<(), ExecutorError>>;
}

/// The obvious [`DemotionExecutor`] for a process already running inside a
/// Tokio runtime: every demotion is `tokio::spawn`ed onto the ambient
/// executor, the same way `foyer-storage` schedules background flushes.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

impl DemotionExecutor for TokioExecutor {
    fn spawn(&self, task: BoxFuture<'static, ()>) -> BoxFuture<'static, Result<(), ExecutorError>> {
        let handle = tokio::spawn(task);
        Box::pin(async move {
            match handle.await {
                Ok(()) => Ok(()),
                Err(e) if e.is_cancelled() => Err(ExecutorError::Cancelled),
                Err(e) => Err(ExecutorError::Panicked(e.to_string())),
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("demotion write to the slow tier failed: {0}")]
struct DemotionFailed(String);

struct Inner<K, V, F, S, W> {
    lru: Lru<K, V, Arc<F>, W>,
    slow: Arc<S>,
    pending: Mutex<HashSet<K>>,
    pending_notify: Notify,
    error_handler: Arc<dyn EvictErrorHandler<K, V>>,
    metrics: Metrics,
    closed: AtomicBool,
}

/// The demotion listener the internal `Lru` invokes on eviction. Rather
/// than writing `slow` inline (as `Buffer` does), it submits the write to
/// the executor and returns immediately, letting the `Lru`'s synchronous
/// eviction loop proceed to delete the key from `fast` without blocking on
/// slow-tier I/O.
struct AsyncDemotionListener<K, V, F, S, W> {
    inner: Weak<Inner<K, V, F, S, W>>,
    executor: Arc<dyn DemotionExecutor>,
}

impl<K, V, F, S, W> EvictListener<K, V> for AsyncDemotionListener<K, V, F, S, W>
where
    K: Key,
    V: Value,
    F: Mapping<K, V> + 'static,
    S: Mapping<K, V> + 'static,
    W: Fn(&K, &V) -> u64 + Send + Sync + 'static,
{
    fn on_evict(&self, key: &K, value: &V) -> std::result::Result<(), CallbackError> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        let key = key.clone();
        let value = value.clone();
        inner.pending.lock().insert(key.clone());

        let inner_for_task = inner.clone();
        let task: BoxFuture<'static, ()> = Box::pin(async move {
            let outcome = inner_for_task.slow.put(key.clone(), value.clone());
            if let Err(err) = outcome {
                let callback_err: CallbackError = Box::new(DemotionFailed(err.to_string()));
                let handled = inner_for_task.error_handler.on_evict_error(&key, &value, &callback_err);
                if !handled {
                    warn!(?key, "demotion failed and was not suppressed; restoring to fast tier");
                    // Restored as if freshly written: resident again and
                    // recency-reinstated at the tail.
                    let _ = inner_for_task.lru.put(key.clone(), value.clone());
                } else {
                    debug!(?key, "demotion failure suppressed; entry is simply dropped");
                }
            } else {
                inner_for_task.metrics.demote.fetch_add(1, Relaxed);
            }
            inner_for_task.pending.lock().remove(&key);
            inner_for_task.pending_notify.notify_waiters();
        });

        self.executor.spawn(task);
        Ok(())
    }
}

/// `Buffer`, but with background demotion and per-key blocking reads
/// instead of inline slow-tier writes.
pub struct AsyncBuffer<K, V, F, S, W> {
    inner: Arc<Inner<K, V, F, S, W>>,
    slow_to_fast: Vec<Arc<dyn PromoteListener<K, V>>>,
}

impl<K, V, F, S, W> AsyncBuffer<K, V, F, S, W>
where
    K: Key,
    V: Value,
    F: Mapping<K, V> + 'static,
    S: Mapping<K, V> + 'static,
    W: Fn(&K, &V) -> u64 + Send + Sync + 'static,
{
    pub fn new(fast: F, slow: S, n: i64, weight: W, executor: impl DemotionExecutor) -> Self {
        Self::with_error_handler(fast, slow, n, weight, executor, Arc::new(PropagateEvictErrors))
    }

    pub fn with_error_handler(
        fast: F,
        slow: S,
        n: i64,
        weight: W,
        executor: impl DemotionExecutor,
        error_handler: Arc<dyn EvictErrorHandler<K, V>>,
    ) -> Self {
        let slow = Arc::new(slow);
        let executor: Arc<dyn DemotionExecutor> = Arc::new(executor);
        let inner = Arc::new_cyclic(|weak| {
            let listener =
                Arc::new(AsyncDemotionListener { inner: weak.clone(), executor: executor.clone() });
            let lru = Lru::new(Arc::new(fast), LruConfig { n, offset: 0, weight }).with_listener(listener);
            Inner {
                lru,
                slow,
                pending: Mutex::new(HashSet::new()),
                pending_notify: Notify::new(),
                error_handler,
                metrics: Metrics::default(),
                closed: AtomicBool::new(false),
            }
        });
        Self { inner, slow_to_fast: Vec::new() }
    }

    pub fn with_slow_to_fast_listener(mut self, listener: Arc<dyn PromoteListener<K, V>>) -> Self {
        self.slow_to_fast.push(listener);
        self
    }

    pub fn n(&self) -> i64 {
        self.inner.lru.n()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    fn check_open(&self) -> Result<(), K> {
        if self.inner.closed.load(Relaxed) {
            Err(Error::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    /// Await `key`'s pending demotion, if any, without blocking the thread
    /// (usable from async contexts, e.g. [`Self::async_get`]).
    async fn await_pending(&self, key: &K) {
        loop {
            let notified = self.inner.pending_notify.notified();
            if !self.inner.pending.lock().contains(key) {
                return;
            }
            notified.await;
        }
    }

    /// Block the calling thread on `key`'s pending demotion, if any. Used
    /// by the synchronous [`Mapping`] methods.
    fn wait_pending(&self, key: &K) {
        futures::executor::block_on(self.await_pending(key));
    }

    fn promote(&self, key: &K, value: V) {
        // Mirrors Buffer::promote, minus the promoting-lock dance: a demotion
        // of this exact key cannot be in flight here (we just waited for it),
        // so the only remaining race is a concurrent `put`, which `Lru::put`
        // itself already serializes against via `evicting_now`.
        if let Err(err) = self.inner.lru.put(key.clone(), value.clone()) {
            warn!(?err, ?key, "promotion write to fast tier failed");
            return;
        }
        let _ = self.inner.slow.delete(key);
        self.inner.metrics.promote.fetch_add(1, Relaxed);
        for listener in &self.slow_to_fast {
            listener.on_promote(key, &value);
        }
    }

    /// Performs `fast.get_all_or_nothing(ks)`; on a partial miss, awaits
    /// the pending demotions for the missing keys
    /// (or reads them directly from `slow`) and assembles the result.
    /// Never promotes while assembling the batch, so that a key this call
    /// just read is not immediately re-demoted before the caller has used
    /// it; promotion happens lazily on a later [`Mapping::get`].
    pub async fn async_get(&self, keys: &[K]) -> Result<HashMap<K, V>, K> {
        self.check_open()?;
        match self.inner.lru.get_all_or_nothing(keys) {
            Ok(found) => return Ok(found),
            Err(Error::NotFoundAny(missing)) => {
                let mut result = HashMap::with_capacity(keys.len());
                let mut still_missing = std::collections::HashSet::new();

                for key in &missing {
                    self.await_pending(key).await;
                    // The demotion may have completed (key now in `slow`) or
                    // failed and been restored (key back in `fast`).
                    if self.inner.lru.contains(key) {
                        match self.inner.lru.get(key) {
                            Ok(v) => {
                                result.insert(key.clone(), v);
                                continue;
                            }
                            Err(Error::NotFound) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    match self.inner.slow.get(key) {
                        Ok(v) => {
                            result.insert(key.clone(), v);
                        }
                        Err(Error::NotFound) => {
                            still_missing.insert(key.clone());
                        }
                        Err(e) => return Err(e),
                    }
                }

                if !still_missing.is_empty() {
                    return Err(Error::NotFoundAny(still_missing));
                }

                for key in keys {
                    if !missing.contains(key) && !result.contains_key(key) {
                        result.insert(key.clone(), self.inner.lru.get(key)?);
                    }
                }
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }
}

impl<K, V, F, S, W> Mapping<K, V> for AsyncBuffer<K, V, F, S, W>
where
    K: Key,
    V: Value,
    F: Mapping<K, V> + 'static,
    S: Mapping<K, V> + 'static,
    W: Fn(&K, &V) -> u64 + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<V, K> {
        self.check_open()?;
        self.wait_pending(key);
        match self.inner.lru.get(key) {
            Ok(v) => return Ok(v),
            Err(Error::NotFound) => {}
            Err(e) => return Err(e),
        }
        let value = self.inner.slow.get(key)?;
        self.promote(key, value.clone());
        Ok(value)
    }

    fn put(&self, key: K, value: V) -> Result<(), K> {
        self.check_open()?;
        self.wait_pending(&key);
        self.inner.lru.put(key, value)
    }

    fn delete(&self, key: &K) -> Result<(), K> {
        self.check_open()?;
        self.wait_pending(key);
        match self.inner.lru.delete(key) {
            Ok(()) => {
                let _ = self.inner.slow.delete(key);
                Ok(())
            }
            Err(Error::NotFound) => self.inner.slow.delete(key),
            Err(e) => Err(e),
        }
    }

    fn contains(&self, key: &K) -> bool {
        !self.inner.closed.load(Relaxed) && (self.inner.lru.contains(key) || self.inner.slow.contains(key))
    }

    fn len(&self) -> usize {
        self.inner.lru.len() + self.inner.slow.len()
    }

    fn keys(&self) -> Vec<K> {
        let mut keys = self.inner.lru.keys();
        keys.extend(self.inner.slow.keys());
        keys
    }

    fn close(&self) -> Result<(), K> {
        self.inner.closed.store(true, Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::memory_mapping::MemoryMapping;

    /// An executor that drives the task to completion inline, inside the
    /// `spawn` call itself, for deterministic tests: the demotion
    /// "completes" synchronously from the submitting thread's point of
    /// view, which lets the tests assert on post-`put` state without
    /// needing a real async runtime driving things in the background.
    struct InlineExecutor;

    impl DemotionExecutor for InlineExecutor {
        fn spawn(&self, task: BoxFuture<'static, ()>) -> BoxFuture<'static, Result<(), ExecutorError>> {
            futures::executor::block_on(task);
            Box::pin(async { Ok(()) })
        }
    }

    fn unit_async_buffer(
        n: i64,
    ) -> AsyncBuffer<i32, i32, MemoryMapping<i32, i32>, MemoryMapping<i32, i32>, fn(&i32, &i32) -> u64> {
        AsyncBuffer::new(MemoryMapping::new(), MemoryMapping::new(), n, |_: &i32, _: &i32| 1, InlineExecutor)
    }

    #[test_log::test(tokio::test)]
    async fn demotion_runs_and_get_blocks_until_it_completes() {
        let buf = unit_async_buffer(1);
        buf.put(1, 1).unwrap();
        buf.put(2, 2).unwrap(); // triggers (inline, synchronously-awaited) demotion of 1

        assert!(buf.inner.slow.contains(&1));
        assert_eq!(buf.get(&1).unwrap(), 1);
        assert!(buf.inner.lru.contains(&1));
    }

    #[test_log::test(tokio::test)]
    async fn async_get_assembles_from_fast_and_slow() {
        let buf = unit_async_buffer(1);
        buf.put(1, 1).unwrap();
        buf.put(2, 2).unwrap(); // demotes 1

        let result = buf.async_get(&[1, 2]).await.unwrap();
        assert_eq!(result.get(&1), Some(&1));
        assert_eq!(result.get(&2), Some(&2));
    }

    #[test_log::test(tokio::test)]
    async fn demotion_failure_not_suppressed_restores_to_fast() {
        struct AlwaysFail;
        impl<K: Key, V: Value> EvictErrorHandler<K, V> for AlwaysFail {
            fn on_evict_error(&self, _k: &K, _v: &V, _e: &CallbackError) -> bool {
                false
            }
        }

        struct FailingSlow(AtomicUsize);
        impl Mapping<i32, i32> for FailingSlow {
            fn get(&self, _key: &i32) -> Result<i32, i32> {
                Err(Error::NotFound)
            }
            fn put(&self, _key: i32, _value: i32) -> Result<(), i32> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(Error::backend(std::io::Error::other("disk full")))
            }
            fn delete(&self, _key: &i32) -> Result<(), i32> {
                Err(Error::NotFound)
            }
            fn contains(&self, _key: &i32) -> bool {
                false
            }
            fn len(&self) -> usize {
                0
            }
            fn keys(&self) -> Vec<i32> {
                Vec::new()
            }
            fn close(&self) -> Result<(), i32> {
                Ok(())
            }
        }

        let buf = AsyncBuffer::with_error_handler(
            MemoryMapping::new(),
            FailingSlow(AtomicUsize::new(0)),
            1,
            |_: &i32, _: &i32| 1,
            InlineExecutor,
            Arc::new(AlwaysFail),
        );

        buf.put(1, 1).unwrap();
        buf.put(2, 2).unwrap(); // demotion of 1 fails and is restored

        assert!(buf.inner.lru.contains(&1));
        assert_eq!(buf.get(&1).unwrap(), 1);
    }
}
