//! A two-tier `Buffer`: a 2-entry fast tier backed by an unbounded slow
//! tier, both `MemoryMapping`s for this demo.
//!
//! Run with `cargo run --bin buffer -p kvstack-demos`.

use kvstack::prelude::*;

fn main() {
    let buffer = Buffer::new(MemoryMapping::new(), MemoryMapping::new(), 2, |_: &str, _: &i32| 1);

    buffer.put("a", 1).unwrap();
    buffer.put("b", 2).unwrap();
    buffer.put("c", 3).unwrap(); // demotes "a" to the slow tier

    println!("a is still reachable via buffer.contains: {}", buffer.contains(&"a"));
    let value = buffer.get(&"a").unwrap(); // promotes "a" back into the fast tier
    println!("promoted a = {value}");
    println!("metrics: {:?}", buffer.metrics());
}
