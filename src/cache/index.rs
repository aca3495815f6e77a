//! mtime-ordered index of files beneath a cache root
//!
//! Kept newest-first so eviction always consumes the tail. Mutation happens
//! under the caller's lock (the index itself holds no lock; `Mount` wraps it
//! in `parking_lot::RwLock` alongside the rest of the cache-path state).

use crate::cache::record::{self, mtime_of};
use crate::error::Result;
use crate::types::CacheEntry;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Predicate answering whether a cache-root-relative file may be deleted.
/// Injected at construction so the index never has to know about the
/// open-file table directly.
pub type EvictabilityOracle = Box<dyn Fn(&Path) -> bool + Send + Sync>;

pub struct CacheIndex {
    cache_root: PathBuf,
    entries: Vec<CacheEntry>,
    oracle: EvictabilityOracle,
}

impl CacheIndex {
    /// Scan `cache_root` recursively, indexing every regular file.
    pub fn scan(cache_root: PathBuf, oracle: EvictabilityOracle) -> Self {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&cache_root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            entries.push(CacheEntry {
                path: entry.path().to_path_buf(),
                mtime: mtime_of(&meta),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| b.mtime.cmp(&a.mtime));
        info!(count = entries.len(), root = %cache_root.display(), "cache index scanned");
        Self {
            cache_root,
            entries,
            oracle,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert_sorted(&mut self, entry: CacheEntry) {
        let pos = self
            .entries
            .partition_point(|e| e.mtime > entry.mtime);
        self.entries.insert(pos, entry);
    }

    /// Stat `absolute_path` and index it if it's a regular file. No-op on
    /// stat failure.
    pub fn notify_added(&mut self, absolute_path: &Path) {
        let Ok(meta) = std::fs::metadata(absolute_path) else {
            return;
        };
        if !meta.is_file() {
            return;
        }
        self.entries.retain(|e| e.path != absolute_path);
        self.insert_sorted(CacheEntry {
            path: absolute_path.to_path_buf(),
            mtime: mtime_of(&meta),
            size: meta.len(),
        });
        debug!(path = %absolute_path.display(), "cache index: added");
    }

    /// Pin-while-open: remove `absolute_path` from the index so it is not an
    /// eviction candidate. Does not touch on-disk mtime; re-indexing happens
    /// on next `notify_added` or restart.
    pub fn touch(&mut self, absolute_path: &Path) {
        let before = self.entries.len();
        self.entries.retain(|e| e.path != absolute_path);
        if self.entries.len() != before {
            debug!(path = %absolute_path.display(), "cache index: touched (pinned)");
        }
    }

    /// Explicit removal, e.g. after the file itself was deleted out from
    /// under us.
    pub fn forget(&mut self, absolute_path: &Path) {
        self.entries.retain(|e| e.path != absolute_path);
    }

    /// Evict oldest-first until under `max_bytes`, or until every remaining
    /// tail entry is refused by the evictability oracle. Returns bytes freed.
    pub fn reclaim(&mut self, max_bytes: u64) -> u64 {
        let mut total = self.total_size();
        if total <= max_bytes {
            return 0;
        }

        let mut freed = 0u64;
        let mut keep = Vec::with_capacity(self.entries.len());
        // entries is newest-first; walk from the tail (oldest) backwards.
        let mut rest: Vec<CacheEntry> = self.entries.drain(..).collect();
        while let Some(entry) = rest.pop() {
            if total > max_bytes && (self.oracle)(&entry.path) {
                match std::fs::remove_file(&entry.path) {
                    Ok(()) => debug!(path = %entry.path.display(), "evicted"),
                    Err(e) => warn!(path = %entry.path.display(), error = %e, "evict unlink failed"),
                }
                total = total.saturating_sub(entry.size);
                freed += entry.size;
            } else {
                keep.push(entry);
            }
        }
        // `keep` was built oldest-first (as popped); restore newest-first order.
        keep.reverse();
        self.entries = keep;

        if freed > 0 {
            info!(bytes_freed = freed, "cache reclaim pass complete");
        }
        freed
    }

    /// Persist the index as a stream of length-prefixed records.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        for entry in &self.entries {
            record::write_record(&mut w, entry, &self.cache_root)?;
        }
        Ok(())
    }

    /// Replace the in-memory index with the contents of `path`. A corrupt
    /// file yields an empty index rather than propagating the error, per the
    /// durability policy: the index is always reconstructable by rescanning.
    pub fn load(&mut self, path: &Path) {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return,
        };
        let mut r = BufReader::new(file);
        let mut loaded = Vec::new();
        loop {
            match record::read_record(&mut r, &self.cache_root) {
                Ok(Some(entry)) => loaded.push(entry),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "cache index load aborted, using empty index");
                    loaded.clear();
                    break;
                }
            }
        }
        loaded.sort_by(|a, b| b.mtime.cmp(&a.mtime));
        self.entries = loaded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn entry(path: &str, secs_ago: u64, size: u64) -> CacheEntry {
        CacheEntry {
            path: PathBuf::from(path),
            mtime: SystemTime::now() - Duration::from_secs(secs_ago),
            size,
        }
    }

    fn always_evictable(_: &Path) -> bool {
        true
    }

    #[test]
    fn insert_sorted_keeps_mtime_descending() {
        let mut idx = CacheIndex {
            cache_root: PathBuf::from("/c"),
            entries: Vec::new(),
            oracle: Box::new(always_evictable),
        };
        idx.insert_sorted(entry("/c/a", 100, 10));
        idx.insert_sorted(entry("/c/b", 50, 10));
        idx.insert_sorted(entry("/c/c", 150, 10));
        let paths: Vec<_> = idx.entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("/c/b"), PathBuf::from("/c/a"), PathBuf::from("/c/c")]
        );
    }

    #[test]
    fn touch_removes_without_reordering_others() {
        let mut idx = CacheIndex {
            cache_root: PathBuf::from("/c"),
            entries: vec![entry("/c/a", 10, 5), entry("/c/b", 20, 5)],
            oracle: Box::new(always_evictable),
        };
        idx.touch(Path::new("/c/a"));
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.entries[0].path, PathBuf::from("/c/b"));
    }

    #[test]
    fn reclaim_respects_oracle_refusal() {
        let mut idx = CacheIndex {
            cache_root: PathBuf::from("/c"),
            entries: Vec::new(),
            oracle: Box::new(|p: &Path| p != Path::new("/c/old")),
        };
        idx.insert_sorted(entry("/c/old", 100, 50));
        idx.insert_sorted(entry("/c/new", 10, 50));
        // old is pinned open; reclaim cannot free it even though it's oldest.
        let freed = idx.reclaim(10);
        assert_eq!(freed, 0);
        assert_eq!(idx.len(), 2);
    }

    fn populate_ten_graduated_files(idx: &mut CacheIndex) {
        // f1 is oldest (t1), f10 is newest (t10), 200 KiB each.
        for i in 1..=10u64 {
            idx.insert_sorted(entry(&format!("/c/f{i}"), 10 * (11 - i), 200 * 1024));
        }
    }

    #[test]
    fn reclaim_frees_oldest_first_until_under_budget() {
        let mut idx = CacheIndex {
            cache_root: PathBuf::from("/c"),
            entries: Vec::new(),
            oracle: Box::new(always_evictable),
        };
        populate_ten_graduated_files(&mut idx);

        let freed = idx.reclaim(1024 * 1024);

        assert_eq!(freed, 5 * 200 * 1024);
        assert_eq!(idx.len(), 5);
        let remaining: Vec<_> = idx.entries.iter().map(|e| e.path.clone()).collect();
        for i in 1..=5u64 {
            assert!(!remaining.contains(&PathBuf::from(format!("/c/f{i}"))));
        }
        for i in 6..=10u64 {
            assert!(remaining.contains(&PathBuf::from(format!("/c/f{i}"))));
        }
    }

    #[test]
    fn reclaim_skips_pinned_oldest_entry_and_frees_further_down_the_tail() {
        let mut idx = CacheIndex {
            cache_root: PathBuf::from("/c"),
            entries: Vec::new(),
            oracle: Box::new(|p: &Path| p != Path::new("/c/f1")),
        };
        populate_ten_graduated_files(&mut idx);

        let freed = idx.reclaim(1024 * 1024);

        // f1 is refused by the oracle, so f2..f6 are freed instead.
        assert_eq!(freed, 5 * 200 * 1024);
        assert_eq!(idx.len(), 5);
        let remaining: Vec<_> = idx.entries.iter().map(|e| e.path.clone()).collect();
        assert!(remaining.contains(&PathBuf::from("/c/f1")));
    }

    fn entry_under(cache_root: &Path, name: &str, secs_ago: u64, size: u64) -> CacheEntry {
        CacheEntry {
            path: cache_root.join(name),
            mtime: SystemTime::now() - Duration::from_secs(secs_ago),
            size,
        }
    }

    #[test]
    fn save_then_load_round_trips_sorted_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let cache_root = dir.path().to_path_buf();
        let mut idx = CacheIndex {
            cache_root: cache_root.clone(),
            entries: Vec::new(),
            oracle: Box::new(always_evictable),
        };
        idx.insert_sorted(entry_under(&cache_root, "x", 100, 10));
        idx.insert_sorted(entry_under(&cache_root, "y", 200, 20));
        idx.insert_sorted(entry_under(&cache_root, "z", 150, 30));

        let save_path = dir.path().join("index.bin");
        idx.save(&save_path).unwrap();

        let mut loaded = CacheIndex {
            cache_root,
            entries: Vec::new(),
            oracle: Box::new(always_evictable),
        };
        loaded.load(&save_path);

        let names: Vec<_> = loaded
            .entries
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["y", "z", "x"]);
        assert_eq!(loaded.total_size(), 60);
    }

    #[test]
    fn corrupt_load_yields_empty_index_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad_path = dir.path().join("corrupt.bin");
        std::fs::write(&bad_path, b"not a valid record stream at all").unwrap();

        let mut idx = CacheIndex {
            cache_root: dir.path().to_path_buf(),
            entries: vec![entry("/c/a", 10, 5)],
            oracle: Box::new(always_evictable),
        };
        idx.load(&bad_path);
        assert!(idx.is_empty());
    }
}
