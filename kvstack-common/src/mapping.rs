//! The `Mapping` contract every layer implements and every child honors.
//!
//! This is the Rust substitute for the dynamically-typed `collections.abc`
//! mapping protocol the original design inherits from: one trait every
//! component advertises, with default bulk (`get_many`/`put_many`/
//! `delete_many`) and view methods built from the single-key primitives so
//! a minimal backend only has to implement five methods.

use crate::error::{Error, Result};
use crate::key_value::{Key, Value};

/// A key/value container honoring three invariants:
///
/// 1. `contains(k)` iff `get(k)` succeeds.
/// 2. `len()` equals the number of distinct bound keys.
/// 3. `iter_keys`/`iter_items`/`iter_values` reflect the mapping as of the
///    moment they are called; continuing to iterate across a concurrent
///    mutation is not guaranteed to be consistent (see crate docs).
pub trait Mapping<K: Key, V: Value>: Send + Sync {
    /// Look up `key`. Returns [`Error::NotFound`] if absent.
    fn get(&self, key: &K) -> Result<V, K>;

    /// Bind `key` to `value`, overwriting any prior value unless the
    /// backend forbids overwrite (a write-once, `Zip`-style backend is out
    /// of scope for this crate).
    fn put(&self, key: K, value: V) -> Result<(), K>;

    /// Remove `key`. Returns [`Error::NotFound`] if it was not bound.
    fn delete(&self, key: &K) -> Result<(), K>;

    /// `true` iff `key` is currently bound.
    fn contains(&self, key: &K) -> bool;

    /// The number of distinct bound keys.
    fn len(&self) -> usize;

    /// `true` iff the mapping currently binds no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of the currently-bound keys, in whatever order the
    /// backend iterates them.
    fn keys(&self) -> Vec<K>;

    /// A snapshot of the currently-bound `(key, value)` pairs.
    ///
    /// The default implementation re-reads each key found by [`Self::keys`]
    /// individually, so a key deleted between the snapshot and the read is
    /// silently dropped from the result rather than surfaced as an error:
    /// view methods are not required to be thread-safe across a concurrent
    /// mutation.
    fn items(&self) -> Vec<(K, V)> {
        self.keys()
            .into_iter()
            .filter_map(|k| self.get(&k).ok().map(|v| (k.clone(), v)))
            .collect()
    }

    /// A snapshot of the currently-bound values. See [`Self::items`].
    fn values(&self) -> Vec<V> {
        self.items().into_iter().map(|(_, v)| v).collect()
    }

    /// Release any resources this mapping owns. Idempotent: calling
    /// `close` twice succeeds both times. After `close`, every other
    /// operation fails with [`Error::AlreadyClosed`].
    fn close(&self) -> Result<(), K>;

    /// Fetch several keys. The default dispatches to [`Self::get`] per key
    /// and returns [`Error::NotFoundAny`] carrying every key that missed
    /// (not just the first) if any key is absent; a backend that can do
    /// better (e.g. a single batched lookup) should override this.
    fn get_many(&self, keys: &[K]) -> Result<Vec<(K, V)>, K> {
        let mut found = Vec::with_capacity(keys.len());
        let mut missing = std::collections::HashSet::new();
        for k in keys {
            match self.get(k) {
                Ok(v) => found.push((k.clone(), v)),
                Err(Error::NotFound) => {
                    missing.insert(k.clone());
                }
                Err(e) => return Err(e),
            }
        }
        if missing.is_empty() {
            Ok(found)
        } else {
            Err(Error::NotFoundAny(missing))
        }
    }

    /// Bind several `(key, value)` pairs. The default dispatches to
    /// [`Self::put`] per item, in order; a partial failure leaves earlier
    /// items bound (no rollback) unless a backend overrides this with
    /// something stronger.
    fn put_many(&self, items: Vec<(K, V)>) -> Result<(), K> {
        for (k, v) in items {
            self.put(k, v)?;
        }
        Ok(())
    }

    /// Remove several keys. The default dispatches to [`Self::delete`] per
    /// key and ignores [`Error::NotFound`] for individual keys (bulk
    /// deletes are naturally idempotent over a set).
    fn delete_many(&self, keys: &[K]) -> Result<(), K> {
        for k in keys {
            match self.delete(k) {
                Ok(()) | Err(Error::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Any mapping shared behind an `Arc` is itself a mapping: a `Buffer`'s
/// `fast`/`slow` tiers and an `AsyncBuffer`'s background demotion task both
/// need to hold a child mapping by shared reference rather than by value,
/// the same way `foyer-storage`'s `Store` implementations are always used
/// through an `Arc`.
impl<K: Key, V: Value, T: Mapping<K, V> + ?Sized> Mapping<K, V> for std::sync::Arc<T> {
    fn get(&self, key: &K) -> Result<V, K> {
        (**self).get(key)
    }

    fn put(&self, key: K, value: V) -> Result<(), K> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &K) -> Result<(), K> {
        (**self).delete(key)
    }

    fn contains(&self, key: &K) -> bool {
        (**self).contains(key)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn keys(&self) -> Vec<K> {
        (**self).keys()
    }

    fn close(&self) -> Result<(), K> {
        (**self).close()
    }

    fn get_many(&self, keys: &[K]) -> Result<Vec<(K, V)>, K> {
        (**self).get_many(keys)
    }

    fn put_many(&self, items: Vec<(K, V)>) -> Result<(), K> {
        (**self).put_many(items)
    }

    fn delete_many(&self, keys: &[K]) -> Result<(), K> {
        (**self).delete_many(keys)
    }
}
