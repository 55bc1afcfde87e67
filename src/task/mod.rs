//! Worker-thread pool and the fork-join barrier primitive.

mod pool;

pub use pool::TaskPool;
