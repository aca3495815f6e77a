//! A single open-file entry
//!
//! Descriptor lifetime is expressed the idiomatic way: entries are shared via
//! `Arc`, and `std::fs::File`'s own `Drop` already closes the underlying
//! descriptor, so the C original's explicit ref/unref-and-close dance
//! collapses into "the entry drops when its last `Arc` clone does". Mutable
//! per-entry state (both descriptors and their read cursors) lives behind one
//! mutex so the splice step in the copy worker can swap `cache_fd` in without
//! racing a concurrent read.
use parking_lot::Mutex;
use std::fs::File;
use std::path::PathBuf;
use tracing::trace;

use crate::types::Handle;

pub(crate) struct EntryState {
    pub source_fd: File,
    pub source_cursor: u64,
    pub cache_fd: Option<File>,
    pub cache_cursor: u64,
}

pub struct HandleEntry {
    pub handle: Handle,
    pub relative_path: PathBuf,
    pub(crate) state: Mutex<EntryState>,
}

impl HandleEntry {
    pub fn new(handle: Handle, relative_path: PathBuf, source_fd: File) -> Self {
        Self {
            handle,
            relative_path,
            state: Mutex::new(EntryState {
                source_fd,
                source_cursor: 0,
                cache_fd: None,
                cache_cursor: 0,
            }),
        }
    }

    pub fn has_cache_fd(&self) -> bool {
        self.state.lock().cache_fd.is_some()
    }
}

impl Drop for HandleEntry {
    fn drop(&mut self) {
        trace!(handle = self.handle, path = %self.relative_path.display(), "handle entry closed");
    }
}
