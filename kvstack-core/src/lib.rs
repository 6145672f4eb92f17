//! Policy layers over the `kvstack` [`Mapping`](kvstack_common::mapping::Mapping)
//! contract, the same way `foyer-memory` holds every eviction policy
//! `foyer-common` makes possible.
//!
//! - [`insertion_sorted_set`] — the recency-queue primitive `Lru` is built on.
//! - [`lru`] — a weight-bounded recency policy over one child mapping.
//! - [`buffer`] — two-tier fast/slow mapping driven by an internal `Lru`.
//! - [`async_buffer`] — `Buffer`, with slow-tier writes on a background executor.
//! - [`sieve`] — key-routed fan-out across many child mappings.
//! - [`cache`] — read-through cache over one child mapping.
//! - [`weak_value`] — a mapping whose values are retained only weakly.
//! - [`memory_mapping`] — the trivial in-process backend used in tests/demos.

pub mod async_buffer;
pub mod buffer;
pub mod cache;
pub mod insertion_sorted_set;
pub mod lru;
pub mod memory_mapping;
pub mod sieve;
pub mod weak_value;

pub mod prelude {
    pub use kvstack_common::prelude::*;

    pub use crate::async_buffer::{AsyncBuffer, DemotionExecutor, TokioExecutor};
    pub use crate::buffer::Buffer;
    pub use crate::cache::Cache;
    pub use crate::insertion_sorted_set::InsertionSortedSet;
    pub use crate::lru::{Lru, LruConfig};
    pub use crate::memory_mapping::MemoryMapping;
    pub use crate::sieve::Sieve;
    pub use crate::weak_value::WeakValueMapping;
}
