//! Error types for vcachefs mount operations

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VcacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("no such path: {0}")]
    NotFound(std::path::PathBuf),

    #[error("access denied: {0}")]
    AccessDenied(std::path::PathBuf),

    #[error("no such handle: {0}")]
    NoSuchHandle(u64),

    #[error("mount is shutting down")]
    ShuttingDown,

    #[error("cache index corrupt: {0}")]
    IndexCorrupt(String),
}

impl VcacheError {
    /// The `errno` a FUSE reply should carry for this error.
    pub fn as_errno(&self) -> i32 {
        match self {
            VcacheError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            VcacheError::NotFound(_) => libc::ENOENT,
            VcacheError::AccessDenied(_) => libc::EACCES,
            VcacheError::NoSuchHandle(_) => libc::EBADF,
            VcacheError::ShuttingDown => libc::EIO,
            VcacheError::IndexCorrupt(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, VcacheError>;
