//! The callback hooks policy layers invoke around eviction and promotion,
//! modeled the way `foyer_memory::event::EventListener` models cache
//! callbacks: a trait with default no-op methods, invoked outside the
//! owning component's lock.

use crate::error::CallbackError;
use crate::key_value::{Key, Value};

/// Fired around an LRU/Buffer eviction. Registered listeners run in
/// registration order and stop at the first one that returns `Err` — that
/// failure is routed through [`EvictErrorHandler::on_evict_error`] to decide
/// whether `key` is still evicted; listeners registered after the failing
/// one do not run for this eviction.
///
/// Called with the component's lock released, so a listener is free to
/// call back into the same component (re-entrant by construction, not by
/// reentrant-lock discipline — see crate docs "Locking discipline").
pub trait EvictListener<K: Key, V: Value>: Send + Sync + 'static {
    /// `key` was chosen for eviction and will be removed from the backing
    /// mapping unless this call fails and the failure is not suppressed.
    #[allow(unused_variables)]
    fn on_evict(&self, key: &K, value: &V) -> Result<(), CallbackError> {
        Ok(())
    }

    /// `key` was evicted without ever having been written through this
    /// layer (a pure cache drop, as opposed to a dirty demotion). Buffer
    /// uses this to distinguish "value lives on in `slow`" from "value is
    /// simply gone".
    #[allow(unused_variables)]
    fn on_cache_evict(&self, key: &K, value: &V) {}
}

/// Decides whether an [`EvictListener::on_evict`] failure should be
/// swallowed (eviction proceeds, key is removed) or propagated (key stays
/// resident, recency unchanged).
pub trait EvictErrorHandler<K: Key, V: Value>: Send + Sync + 'static {
    /// Return `true` to suppress `error` and continue evicting `key`;
    /// `false` to leave `key` in place and surface the error to the
    /// caller that triggered eviction.
    fn on_evict_error(&self, key: &K, value: &V, error: &CallbackError) -> bool;
}

/// The default handler: never suppresses, so callback failures always
/// propagate. Matches the principle of least surprise for a component
/// constructed without an explicit handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct PropagateEvictErrors;

impl<K: Key, V: Value> EvictErrorHandler<K, V> for PropagateEvictErrors {
    fn on_evict_error(&self, _key: &K, _value: &V, _error: &CallbackError) -> bool {
        false
    }
}

/// A no-op listener, useful as a default when a component is built without
/// any eviction observers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl<K: Key, V: Value> EvictListener<K, V> for NoopListener {}

/// Fired when `Buffer`/`AsyncBuffer` promotes a key from `slow` back into
/// `fast` on a read hit. This is a pure observer: the promotion itself
/// already happened by the time this runs, so there is nothing to
/// suppress or fail.
pub trait PromoteListener<K: Key, V: Value>: Send + Sync + 'static {
    fn on_promote(&self, key: &K, value: &V);
}

impl<K: Key, V: Value> PromoteListener<K, V> for NoopListener {
    fn on_promote(&self, _key: &K, _value: &V) {}
}
