//! An `AsyncBuffer` whose demotions run on the Tokio runtime in the
//! background, while foreground `get`s keep responding immediately for
//! every key that isn't mid-demotion.
//!
//! Run with `cargo run --bin async_buffer -p kvstack-demos`.

use kvstack::prelude::*;

#[tokio::main]
async fn main() {
    let buffer = AsyncBuffer::new(MemoryMapping::new(), MemoryMapping::new(), 1, |_: &i32, _: &i32| 1, TokioExecutor);

    buffer.put(1, 10).unwrap();
    buffer.put(2, 20).unwrap(); // 1 demotes to slow in the background

    let batch = buffer.async_get(&[1, 2]).await.unwrap();
    println!("assembled batch: {batch:?}");
}
