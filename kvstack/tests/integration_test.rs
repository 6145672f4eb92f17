//! Cross-component composition tests: an LRU cap in front of a buffer in
//! front of a plain backend, and a key-routed fan-out behind a read-through
//! cache, built here purely from this crate's own layers so the tests don't
//! depend on an external backend crate.

use std::sync::Arc;

use kvstack::prelude::*;

#[test]
fn lru_stacked_over_buffer_over_memory_mapping() {
    // Buffer(fast cap 1, slow) behind an outer Lru(cap 3) over the whole
    // thing: the outer Lru just forwards reads/writes through, the inner
    // Buffer does its own fast/slow tiering underneath.
    let buffer = Buffer::new(MemoryMapping::new(), MemoryMapping::new(), 1, |_: &str, _: &i32| 1);
    let lru = Lru::with_unit_weight(buffer, 3);

    lru.put("a", 1).unwrap();
    lru.put("b", 2).unwrap(); // demotes "a" inside the inner Buffer
    assert_eq!(lru.get(&"a").unwrap(), 1); // promotes "a" back, bumps outer recency too
    assert!(lru.contains(&"a"));
    assert!(lru.contains(&"b"));
}

#[test]
fn sieve_fans_out_by_selector_and_cache_reads_through_it() {
    let backends = [("hot", MemoryMapping::<i32, i32>::new()), ("cold", MemoryMapping::<i32, i32>::new())];
    let sieve = Sieve::new(backends, |k: &i32| if *k < 100 { "hot" } else { "cold" });

    let cache = Cache::new(sieve, MemoryMapping::new(), true);

    cache.put(5, 50).unwrap();
    cache.put(500, 5000).unwrap();

    assert_eq!(cache.get(&5).unwrap(), 50);
    assert_eq!(cache.get(&500).unwrap(), 5000);
    assert_eq!(cache.metrics().miss, 0); // both puts with update_on_set populated the cache directly
}

#[test_log::test]
fn cache_miss_then_hit_against_a_sieve_backend() {
    let backends = [("hot", MemoryMapping::<i32, i32>::new()), ("cold", MemoryMapping::<i32, i32>::new())];
    let sieve = Sieve::new(backends, |k: &i32| if *k < 100 { "hot" } else { "cold" });
    sieve.put(7, 70).unwrap();

    let cache = Cache::new(sieve, MemoryMapping::new(), false);
    assert_eq!(cache.get(&7).unwrap(), 70);
    assert_eq!(cache.metrics().miss, 1);
    assert_eq!(cache.get(&7).unwrap(), 70);
    assert_eq!(cache.metrics().hit, 1);
}

// `AsyncBuffer::get` blocks the calling thread on a pending demotion; that
// block needs another worker thread free to actually run the spawned
// demotion task, hence `multi_thread` rather than the default current-thread
// test runtime.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_buffer_composes_with_a_synchronous_lru_in_front() {
    let async_buffer = AsyncBuffer::new(MemoryMapping::new(), MemoryMapping::new(), 1, |_: &i32, _: &i32| 1, TokioExecutor);
    let lru = Arc::new(Lru::with_unit_weight(async_buffer, 10));

    lru.put(1, 10).unwrap();
    lru.put(2, 20).unwrap(); // demotes 1 in the async buffer, in the background

    // `get` through the outer Lru blocks on the inner AsyncBuffer's pending
    // demotion as needed, then promotes and returns.
    let value = {
        let lru = lru.clone();
        tokio::task::spawn_blocking(move || lru.get(&1)).await.unwrap().unwrap()
    };
    assert_eq!(value, 10);
    assert!(lru.contains(&1));
    assert!(lru.contains(&2));
}

#[test]
fn insertion_sorted_set_keeps_first_insertion_order_and_dedups() {
    let mut set = InsertionSortedSet::new();
    set.add(1);
    set.add(2);
    set.add(1);
    set.add(3);
    assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn weak_value_cache_drops_entries_once_unreferenced_by_anything_else() {
    let backing: MemoryMapping<i32, Arc<String>> = MemoryMapping::new();
    let cache = Cache::new(backing, WeakValueMapping::new(), true);

    let value = Arc::new("cached".to_string());
    cache.put(1, value.clone()).unwrap();
    assert!(cache.contains(&1));

    drop(value);
    // `cache`'s own weakly-held copy is gone, but the backing mapping still
    // has the value, so a read still succeeds and repopulates the cache.
    assert_eq!(*cache.get(&1).unwrap(), "cached");
}
