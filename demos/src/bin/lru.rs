//! A weight-bounded LRU in front of the in-process `MemoryMapping` backend.
//!
//! Run with `cargo run --bin lru -p kvstack-demos`.

use kvstack::prelude::*;

fn main() {
    let lru = Lru::with_unit_weight(MemoryMapping::new(), 3);

    lru.put("a", 1).unwrap();
    lru.put("b", 2).unwrap();
    lru.put("c", 3).unwrap();
    lru.get(&"a").unwrap(); // "a" is now the most recently touched

    lru.put("d", 4).unwrap(); // evicts "b", the least recently used
    println!("contains a: {}", lru.contains(&"a"));
    println!("contains b: {}", lru.contains(&"b"));
    println!("metrics: {:?}", lru.metrics());
}
