//! Dual-indexed table of open handles
//!
//! One `parking_lot::RwLock` guards both the by-handle map and the by-path
//! multimap together; they are always mutated in lockstep so the invariant
//! "reachable from one iff reachable from the other" can never be observed
//! broken from outside this module.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::table::entry::HandleEntry;
use crate::types::{Handle, FIRST_HANDLE};

struct Indices {
    by_handle: HashMap<Handle, Arc<HandleEntry>>,
    by_path: HashMap<PathBuf, Vec<Arc<HandleEntry>>>,
}

pub struct OpenFileTable {
    indices: RwLock<Indices>,
    next_handle: AtomicU64,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(Indices {
                by_handle: HashMap::new(),
                by_path: HashMap::new(),
            }),
            next_handle: AtomicU64::new(FIRST_HANDLE),
        }
    }

    /// Allocate a fresh handle number, open a new entry for `relative_path`
    /// backed by `source_fd`, and index it. Returns the shared entry so the
    /// caller (the `Mount`) can enqueue a copy without a second lookup.
    pub fn insert(&self, relative_path: PathBuf, source_fd: File) -> Arc<HandleEntry> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(HandleEntry::new(handle, relative_path.clone(), source_fd));

        let mut indices = self.indices.write();
        indices.by_handle.insert(handle, entry.clone());
        indices.by_path.entry(relative_path).or_default().push(entry.clone());
        entry
    }

    pub fn lookup_by_handle(&self, handle: Handle) -> Option<Arc<HandleEntry>> {
        self.indices.read().by_handle.get(&handle).cloned()
    }

    /// True iff any handle is currently open on `relative_path`. This is the
    /// evictability oracle's other half: the cache index calls it via a
    /// closure captured over a clone of the table.
    pub fn any_open(&self, relative_path: &Path) -> bool {
        self.indices
            .read()
            .by_path
            .get(relative_path)
            .is_some_and(|v| !v.is_empty())
    }

    /// Detach `handle` from both indices. The entry itself is freed once
    /// every other outstanding clone (e.g. one held by an in-flight read) is
    /// dropped.
    pub fn remove(&self, handle: Handle) {
        let mut indices = self.indices.write();
        let Some(entry) = indices.by_handle.remove(&handle) else {
            return;
        };
        if let Some(siblings) = indices.by_path.get_mut(&entry.relative_path) {
            siblings.retain(|e| e.handle != handle);
            if siblings.is_empty() {
                indices.by_path.remove(&entry.relative_path);
            }
        }
    }

    /// Run `f` against every live entry matching `relative_path`, under the
    /// writer lock, so the copy worker's splice step can't race a concurrent
    /// open or release on the same path.
    pub fn for_each_matching(&self, relative_path: &Path, mut f: impl FnMut(&Arc<HandleEntry>)) {
        let indices = self.indices.write();
        if let Some(entries) = indices.by_path.get(relative_path) {
            for entry in entries {
                f(entry);
            }
        }
    }

    /// Drain every entry, for use during shutdown.
    pub fn drain(&self) -> Vec<Arc<HandleEntry>> {
        let mut indices = self.indices.write();
        let entries: Vec<_> = indices.by_handle.drain().map(|(_, e)| e).collect();
        indices.by_path.clear();
        entries
    }

    pub fn len(&self) -> usize {
        self.indices.read().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.read().by_handle.is_empty()
    }
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn dummy_fd() -> File {
        File::open("/dev/null").expect("/dev/null should exist in test environment")
    }

    #[test]
    fn insert_is_reachable_from_both_indices() {
        let table = OpenFileTable::new();
        let entry = table.insert(PathBuf::from("a/b"), dummy_fd());
        assert!(table.lookup_by_handle(entry.handle).is_some());
        assert!(table.any_open(Path::new("a/b")));
    }

    #[test]
    fn remove_detaches_from_both_indices() {
        let table = OpenFileTable::new();
        let entry = table.insert(PathBuf::from("a/b"), dummy_fd());
        table.remove(entry.handle);
        assert!(table.lookup_by_handle(entry.handle).is_none());
        assert!(!table.any_open(Path::new("a/b")));
    }

    #[test]
    fn concurrent_opens_on_same_path_both_indexed() {
        let table = OpenFileTable::new();
        let e1 = table.insert(PathBuf::from("a/b"), dummy_fd());
        let e2 = table.insert(PathBuf::from("a/b"), dummy_fd());
        assert_ne!(e1.handle, e2.handle);
        assert!(table.any_open(Path::new("a/b")));
        table.remove(e1.handle);
        assert!(table.any_open(Path::new("a/b")));
        table.remove(e2.handle);
        assert!(!table.any_open(Path::new("a/b")));
    }

    #[test]
    fn handles_are_never_reused() {
        let table = OpenFileTable::new();
        let e1 = table.insert(PathBuf::from("a"), dummy_fd());
        table.remove(e1.handle);
        let e2 = table.insert(PathBuf::from("a"), dummy_fd());
        assert_ne!(e1.handle, e2.handle);
    }
}
