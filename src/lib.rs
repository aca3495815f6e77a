//! vcachefs: a pass-through FUSE filesystem that mirrors a read-only source
//! tree onto a bounded local on-disk cache.
//!
//! The library is split into the parts described by its own design: a
//! durable, mtime-ordered [`cache`] index; a dual-indexed [`table`] of open
//! handles; a background [`worker`] that fills the cache and evicts from it;
//! a [`router`] that picks cache or source per read; and [`mount`], which
//! wires all of the above into the host-adapter contract. [`adapter`] is the
//! only module that knows about FUSE itself.

pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod mount;
pub mod router;
pub mod stats;
pub mod table;
pub mod types;
pub mod worker;

pub use error::{Result, VcacheError};
pub use mount::Mount;
pub use types::Config;
