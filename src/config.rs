//! Validated construction of a mount [`Config`](crate::types::Config)
//!
//! A builder resolves and checks paths up front so every later operation can
//! assume `source_root`/`cache_root` are real, absolute, accessible
//! directories.

use crate::error::{Result, VcacheError};
use crate::types::{Config, DEFAULT_MAX_CACHE_SIZE};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ConfigBuilder {
    source_root: PathBuf,
    cache_root: Option<PathBuf>,
    max_cache_size: u64,
    pass_through: bool,
    stats_path: Option<PathBuf>,
    hash_cache_subdir: bool,
}

impl ConfigBuilder {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            cache_root: None,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            pass_through: false,
            stats_path: None,
            hash_cache_subdir: true,
        }
    }

    pub fn cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    pub fn max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size = bytes;
        self
    }

    pub fn pass_through(mut self, enabled: bool) -> Self {
        self.pass_through = enabled;
        self
    }

    pub fn stats_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stats_path = Some(path.into());
        self
    }

    /// Disable the per-mount MD5-hashed cache subdirectory. Useful when the
    /// cache root is already unique to this source root.
    pub fn without_hashed_subdir(mut self) -> Self {
        self.hash_cache_subdir = false;
        self
    }

    pub fn build(self) -> Result<Config> {
        let source_root = self
            .source_root
            .canonicalize()
            .map_err(|_| VcacheError::NotFound(self.source_root.clone()))?;
        if !source_root.is_dir() {
            return Err(VcacheError::NotFound(source_root));
        }

        let base_cache_root = self
            .cache_root
            .unwrap_or_else(|| default_cache_root(&source_root));
        let cache_root = if self.hash_cache_subdir {
            base_cache_root.join(hashed_subdir(&source_root))
        } else {
            base_cache_root
        };

        debug!(
            source = %source_root.display(),
            cache = %cache_root.display(),
            "resolved mount config"
        );

        Ok(Config {
            source_root,
            cache_root,
            max_cache_size: self.max_cache_size,
            pass_through: self.pass_through,
            stats_path: self.stats_path,
        })
    }
}

/// A per-mount subdirectory name derived from the source root's MD5 so
/// several mounts sharing one cache parent never collide.
fn hashed_subdir(source_root: &Path) -> String {
    let digest = md5::compute(source_root.to_string_lossy().as_bytes());
    format!("{digest:x}")
}

fn default_cache_root(source_root: &Path) -> PathBuf {
    let base = dirs_home().unwrap_or_else(std::env::temp_dir);
    let _ = source_root; // only used for the hashed subdir, not the base
    base.join(".cache").join("vcachefs")
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn build_resolves_absolute_paths_and_hashes_subdir() {
        let source = TempDir::new().unwrap();
        let cache_parent = TempDir::new().unwrap();

        let config = ConfigBuilder::new(source.path())
            .cache_root(cache_parent.path())
            .build()
            .unwrap();

        assert!(config.source_root.is_absolute());
        assert!(config.cache_root.starts_with(cache_parent.path()));
        assert_ne!(config.cache_root, cache_parent.path());
    }

    #[test]
    fn build_rejects_missing_source() {
        let result = ConfigBuilder::new("/does/not/exist/hopefully").build();
        assert!(result.is_err());
    }

    #[test]
    fn hashed_subdir_is_stable_for_same_source() {
        let source = TempDir::new().unwrap();
        let a = hashed_subdir(source.path());
        let b = hashed_subdir(source.path());
        assert_eq!(a, b);
    }
}
