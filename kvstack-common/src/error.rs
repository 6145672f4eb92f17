//! The error taxonomy shared by every mapping in the stack.
//!
//! A child mapping's own failures are never downcast or matched on by a
//! policy layer above it — they are boxed into [`Error::BackendFailure`] and
//! propagated verbatim, the same way `foyer-storage`'s device errors cross
//! into `foyer-memory` unexamined.

use std::collections::HashSet;
use std::fmt;

/// A boxed error raised by user code passed into a mapping: a `weight`,
/// `on_evict`, or selector closure.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by any [`crate::mapping::Mapping`] implementation.
///
/// `K` only needs to be [`fmt::Debug`] to render [`Error::NotFoundAny`]; it
/// does not need `Debug` to satisfy the rest of the mapping contract.
#[derive(thiserror::Error, Debug)]
pub enum Error<K> {
    /// A single-key lookup found nothing bound to `key`.
    #[error("key not found")]
    NotFound,

    /// A bulk lookup via [`crate::mapping::Mapping::get_all_or_nothing`]
    /// came up short; carries every key that was missing so the caller can
    /// decide whether to retry or propagate.
    #[error("{} of the requested keys were not found", .0.len())]
    NotFoundAny(HashSet<K>),

    /// The mapping has been closed and no further operations are valid.
    #[error("mapping already closed")]
    AlreadyClosed,

    /// A child mapping raised an error that this layer does not interpret;
    /// it is surfaced unchanged to the caller.
    #[error("backend mapping operation failed")]
    BackendFailure(#[source] CallbackError),

    /// An `on_evict` (or other user) callback raised an error that was not
    /// suppressed by `on_evict_error`.
    #[error("callback raised an error during eviction")]
    CallbackFailure(#[source] CallbackError),

    /// A component was constructed or reconfigured with an invalid
    /// parameter (negative weight bound, non-hashable key, etc).
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),
}

impl<K> Error<K> {
    /// Wrap an arbitrary child-mapping error as a [`Error::BackendFailure`].
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::BackendFailure(Box::new(err))
    }

    /// True if this is the single-key [`Error::NotFound`] variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

/// A convenience alias matching the rest of the ecosystem's `Result<T>`
/// naming (parameterized by key type since [`Error::NotFoundAny`] carries
/// keys).
pub type Result<T, K> = std::result::Result<T, Error<K>>;

impl<K: fmt::Debug> Error<K> {
    /// Build a [`Error::NotFoundAny`] from an iterator of missing keys.
    pub fn not_found_any(missing: impl IntoIterator<Item = K>) -> Self
    where
        K: std::hash::Hash + Eq,
    {
        Error::NotFoundAny(missing.into_iter().collect())
    }
}
