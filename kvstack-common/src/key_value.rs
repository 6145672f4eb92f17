//! Marker traits for the generic parameters every mapping is built over.
//!
//! Mirrors `foyer_common::code::{Key, Value}`: rather than spelling out
//! `Clone + Eq + Hash + Send + Sync + 'static` at every call site, components
//! bound on these two traits and get a blanket impl for anything that
//! already satisfies the bound set.

use std::hash::Hash;

/// A hashable, equatable, cheaply-cloned key.
pub trait Key: Clone + Eq + Hash + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + Send + Sync + 'static> Key for T {}

/// A value a mapping stores. Cloning is required because policy layers
/// (eviction callbacks, promotion/demotion) observe values by reference but
/// sometimes need to move an owned copy across a lock or task boundary
/// (e.g. `AsyncBuffer` handing a value to a spawned demotion).
pub trait Value: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Value for T {}
