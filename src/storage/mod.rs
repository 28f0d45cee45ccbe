//! Stream storage: buffer pool and the record collector feeding it.

pub mod collector;
pub mod pool;

pub use collector::Collector;
pub use pool::{BufHandle, BufferPool, BufferState, PoolStats, WriteToken};
