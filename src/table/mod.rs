//! Sharded sparse storage for the server side of the table.

mod shard;
mod sparse;

pub use sparse::{DumpValue, SparseTable};
