//! A `Sieve` fanning out across two backends by key, with a read-through
//! `Cache` layered on top of the whole thing.
//!
//! Run with `cargo run --bin sieve -p kvstack-demos`.

use kvstack::prelude::*;

fn main() {
    let backends = [("hot", MemoryMapping::<i32, i32>::new()), ("cold", MemoryMapping::<i32, i32>::new())];
    let sieve = Sieve::new(backends, |k: &i32| if *k < 1000 { "hot" } else { "cold" });
    let cache = Cache::new(sieve, MemoryMapping::new(), true);

    cache.put(5, 50).unwrap();
    cache.put(5000, 9999).unwrap();

    println!("cache.get(5) = {}", cache.get(&5).unwrap());
    println!("cache.get(5000) = {}", cache.get(&5000).unwrap());
    println!("metrics: {:?}", cache.metrics());
}
