//! `kvstack` — composable mutable mappings.
//!
//! A `Mapping` is a key/value container; a *policy layer* wraps one or more
//! child mappings to impose a behavior (bounded eviction, tiering, read-
//! through caching, key-routed fan-out) without being the primary place
//! values live. Stack them and you get a storage policy with no bespoke
//! glue code: an `Lru` in front of a `Buffer` in front of whatever concrete
//! backend you bring.
//!
//! This crate is the thin facade over [`kvstack_common`] (the `Mapping`
//! contract, error taxonomy, callback traits) and [`kvstack_core`] (the
//! policy layers themselves), the same split `foyer` keeps over
//! `foyer-common` and `foyer-memory`.
//!
//! ```
//! use kvstack::prelude::*;
//!
//! let backing = MemoryMapping::new();
//! let lru = Lru::with_unit_weight(backing, 2);
//!
//! lru.put("a", 1).unwrap();
//! lru.put("b", 2).unwrap();
//! lru.get(&"a").unwrap(); // touch "a"
//! lru.put("c", 3).unwrap(); // evicts "b", the least recently used
//!
//! assert!(lru.contains(&"a"));
//! assert!(!lru.contains(&"b"));
//! assert!(lru.contains(&"c"));
//! ```

pub use kvstack_common as common;
pub use kvstack_core as core;

pub mod prelude {
    pub use kvstack_core::prelude::*;
}
