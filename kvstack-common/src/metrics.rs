//! Ambient per-component counters, the same role `foyer_common::metrics`
//! plays for `foyer-memory`/`foyer-storage`: relaxed atomics, read on a
//! `metrics()` accessor, never consulted by the component's own logic.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub hit: AtomicU64,
    pub miss: AtomicU64,
    pub insert: AtomicU64,
    pub remove: AtomicU64,
    pub evict: AtomicU64,
    pub promote: AtomicU64,
    pub demote: AtomicU64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            insert: self.insert.load(Ordering::Relaxed),
            remove: self.remove.load(Ordering::Relaxed),
            evict: self.evict.load(Ordering::Relaxed),
            promote: self.promote.load(Ordering::Relaxed),
            demote: self.demote.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`Metrics`], since the atomics themselves are
/// neither `Clone` nor comparable across a snapshot boundary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hit: u64,
    pub miss: u64,
    pub insert: u64,
    pub remove: u64,
    pub evict: u64,
    pub promote: u64,
    pub demote: u64,
}
