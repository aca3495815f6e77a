//! Common types shared across the mount

use std::path::PathBuf;
use std::time::SystemTime;

/// Default cache budget when a mount doesn't specify one (20 MiB).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 20 * 1024 * 1024;

/// Handle counters start at 4, mirroring reserved low descriptor numbers
/// (stdin/stdout/stderr plus one) so a caller can never mistake a vcachefs
/// handle for one of those.
pub const FIRST_HANDLE: u64 = 4;

/// An open vcachefs handle, opaque to callers.
pub type Handle = u64;

/// One entry in the durable, mtime-ordered cache index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Absolute path under the cache root.
    pub path: PathBuf,
    /// Last modification time at indexing time.
    pub mtime: SystemTime,
    /// File size in bytes at indexing time.
    pub size: u64,
}

/// Validated, immutable mount configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory mirrored by the mount.
    pub source_root: PathBuf,
    /// Local directory backing the cache.
    pub cache_root: PathBuf,
    /// Eviction budget in bytes.
    pub max_cache_size: u64,
    /// When set, caching is bypassed entirely; reads always hit source.
    pub pass_through: bool,
    /// Optional path to a CSV statistics sink.
    pub stats_path: Option<PathBuf>,
}

/// Kind of filesystem object, enough for `getattr`/`readdir` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// Attribute snapshot handed back to the host adapter for `getattr`.
#[derive(Debug, Clone)]
pub struct Attr {
    pub kind: FileKind,
    pub size: u64,
    pub perm: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: SystemTime,
    pub atime: SystemTime,
    pub ctime: SystemTime,
}

/// One entry returned from `readdir`. `attr` is best-effort: some adapters
/// skip per-entry stat and let a later `getattr` fill it in.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: std::ffi::OsString,
    pub attr: Option<Attr>,
}

/// Filesystem-level statistics returned from `statfs`, mirroring the source.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatfsInfo {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub max_filename_len: u32,
}

impl Config {
    pub fn new(source_root: PathBuf, cache_root: PathBuf) -> Self {
        Self {
            source_root,
            cache_root,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            pass_through: false,
            stats_path: None,
        }
    }
}
