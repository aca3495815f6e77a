//! The mtime-ordered cache index and its durable on-disk record format.

pub mod index;
pub mod record;

pub use index::{CacheIndex, EvictabilityOracle};
