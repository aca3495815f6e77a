//! Mount lifecycle and the host-adapter contract
//!
//! `Mount` is the library-level surface a host adapter calls into: it has no
//! dependency on any particular FUSE binding. It owns the cache index, the
//! open-file table, and the copy worker, and wires them together exactly as
//! described by the component design: `open` enqueues cache misses, `read`
//! dispatches through the router, and `destroy` quiesces everything behind a
//! watchdog that force-exits the process if a stuck remote read wedges
//! shutdown.

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use nix::sys::signal::{self, Signal};
use nix::sys::statvfs::statvfs;
use nix::unistd::{access, AccessFlags, Pid};
use std::fs::File;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::CacheIndex;
use crate::error::{Result, VcacheError};
use crate::router::{route_read, ReadSource};
use crate::stats::StatsSink;
use crate::table::OpenFileTable;
use crate::types::{Attr, Config, DirEntry, FileKind, Handle, StatfsInfo};
use crate::worker::CopyWorker;

/// The watchdog's fuse: shutdown must complete within this window or the
/// process group is killed outright. There is no safe way to interrupt a
/// syscall blocked on a wedged remote filesystem.
const SHUTDOWN_WATCHDOG: Duration = Duration::from_secs(15);

pub struct Mount {
    config: Config,
    table: Arc<OpenFileTable>,
    index: Arc<RwLock<CacheIndex>>,
    worker: std::sync::Mutex<Option<CopyWorker>>,
    queue_tx: Sender<PathBuf>,
    quit: Arc<AtomicBool>,
    stats: Option<StatsSink>,
}

impl Mount {
    /// Build the cache index (scanning the cache root), open the stats sink
    /// if configured, and spawn the copy worker. Returns a shared handle
    /// since every host-adapter callback needs concurrent access.
    pub fn init(config: Config) -> Result<Arc<Mount>> {
        std::fs::create_dir_all(&config.cache_root)?;

        let table = Arc::new(OpenFileTable::new());
        let oracle_table = table.clone();
        let cache_root_for_oracle = config.cache_root.clone();
        let oracle: crate::cache::EvictabilityOracle = Box::new(move |absolute_path| {
            let relative = absolute_path
                .strip_prefix(&cache_root_for_oracle)
                .unwrap_or(absolute_path);
            !oracle_table.any_open(relative)
        });

        let index = Arc::new(RwLock::new(CacheIndex::scan(
            config.cache_root.clone(),
            oracle,
        )));

        let stats = match &config.stats_path {
            Some(path) => Some(StatsSink::open(path)?),
            None => None,
        };

        let quit = Arc::new(AtomicBool::new(false));
        let (worker, queue_tx) = CopyWorker::spawn(
            config.source_root.clone(),
            config.cache_root.clone(),
            config.max_cache_size,
            table.clone(),
            index.clone(),
            quit.clone(),
        );

        info!(
            source = %config.source_root.display(),
            cache = %config.cache_root.display(),
            pass_through = config.pass_through,
            "mount initialized"
        );

        Ok(Arc::new(Mount {
            config,
            table,
            index,
            worker: std::sync::Mutex::new(Some(worker)),
            queue_tx,
            quit,
            stats,
        }))
    }

    /// Quiesce the mount: stop accepting new work, drain the copy worker,
    /// release every still-open handle, and save the cache index. Guarded by
    /// a detached watchdog that kills the process group if this doesn't
    /// finish in time.
    pub fn destroy(&self) {
        info!("mount shutdown requested");
        let done = Arc::new(AtomicBool::new(false));
        spawn_watchdog(done.clone());

        self.quit.store(true, Ordering::Release);
        if let Some(worker) = self.worker.lock().unwrap().as_mut() {
            worker.join();
        }

        for entry in self.table.drain() {
            debug!(handle = entry.handle, "releasing handle during shutdown");
        }

        let index_path = self.config.cache_root.join(".vcachefs-index");
        if let Err(e) = self.index.read().save(&index_path) {
            warn!(error = %e, "failed to save cache index on shutdown");
        }

        done.store(true, Ordering::Release);
        info!("mount shutdown complete");
    }

    pub fn getattr(&self, path: &Path) -> Result<Attr> {
        let source_path = self.config.source_root.join(strip_root(path));
        let meta = std::fs::metadata(&source_path).map_err(|e| map_io(e, path))?;
        Ok(attr_from_metadata(&meta))
    }

    /// Open `path`. On a cache miss (and outside pass-through mode), the
    /// relative path is enqueued for the copy worker and the handle serves
    /// reads from source until the splice step attaches a cache descriptor.
    pub fn open(&self, path: &Path, _flags: i32) -> Result<Handle> {
        let relative = strip_root(path).to_path_buf();
        let source_path = self.config.source_root.join(&relative);
        let source_fd = File::open(&source_path).map_err(|e| map_io(e, path))?;

        let entry = self.table.insert(relative.clone(), source_fd);

        if !self.config.pass_through {
            let cache_path = self.config.cache_root.join(&relative);
            if cache_path.is_file() {
                if let Ok(cache_fd) = File::open(&cache_path) {
                    let mut state = entry.state.lock();
                    state.cache_fd = Some(cache_fd);
                    state.cache_cursor = 0;
                }
                self.index.write().touch(&cache_path);
            } else {
                self.queue_tx.send(relative).ok();
            }
        }

        if let Some(stats) = &self.stats {
            stats.record("open", 0, 0, &path.display().to_string());
        }
        Ok(entry.handle)
    }

    pub fn read(&self, handle: Handle, size: usize, offset: u64) -> Result<Vec<u8>> {
        let entry = self
            .table
            .lookup_by_handle(handle)
            .ok_or(VcacheError::NoSuchHandle(handle))?;

        let mut buf = vec![0u8; size];
        let (n, source) = route_read(&entry, &mut buf, offset).map_err(VcacheError::Io)?;
        buf.truncate(n);

        if let Some(stats) = &self.stats {
            let info = match source {
                ReadSource::Cache => "cache",
                ReadSource::Source => "source",
            };
            stats.record("read", offset, n as u64, info);
        }
        Ok(buf)
    }

    pub fn release(&self, handle: Handle) -> Result<()> {
        self.table.remove(handle);
        Ok(())
    }

    /// Always consults the source, including for `/`: the cache never
    /// writes back, so the source remains the permission owner of record.
    pub fn access(&self, path: &Path, mode: i32) -> Result<()> {
        let source_path = self.config.source_root.join(strip_root(path));
        let flags = AccessFlags::from_bits_truncate(mode);
        access(&source_path, flags).map_err(|errno| {
            if errno == nix::errno::Errno::EACCES {
                VcacheError::AccessDenied(path.to_path_buf())
            } else {
                VcacheError::Io(std::io::Error::from_raw_os_error(errno as i32))
            }
        })
    }

    /// Reads the source directory; only on source enumeration failure does
    /// this fall back to listing the mirrored cache directory. The two are
    /// never unioned.
    pub fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let relative = strip_root(path);
        let source_dir = self.config.source_root.join(relative);
        match read_dir_entries(&source_dir) {
            Ok(entries) => Ok(entries),
            Err(source_err) => {
                let cache_dir = self.config.cache_root.join(relative);
                match read_dir_entries(&cache_dir) {
                    Ok(entries) => {
                        warn!(path = %path.display(), "readdir: source failed, served from cache");
                        Ok(entries)
                    }
                    Err(_) => Err(map_io(source_err, path)),
                }
            }
        }
    }

    pub fn statfs(&self, path: &Path) -> Result<StatfsInfo> {
        let source_path = self.config.source_root.join(strip_root(path));
        let stats = statvfs(&source_path).map_err(|errno| {
            VcacheError::Io(std::io::Error::from_raw_os_error(errno as i32))
        })?;
        Ok(StatfsInfo {
            block_size: stats.block_size(),
            blocks: stats.blocks(),
            blocks_free: stats.blocks_free(),
            blocks_available: stats.blocks_available(),
            files: stats.files(),
            files_free: stats.files_free(),
            max_filename_len: stats.name_max() as u32,
        })
    }
}

fn spawn_watchdog(done: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        std::thread::sleep(SHUTDOWN_WATCHDOG);
        if !done.load(Ordering::Acquire) {
            error!("shutdown watchdog fired, killing process group");
            let _ = signal::killpg(Pid::this(), Signal::SIGKILL);
        }
    });
}

fn strip_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

fn map_io(e: std::io::Error, path: &Path) -> VcacheError {
    match e.kind() {
        std::io::ErrorKind::NotFound => VcacheError::NotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => VcacheError::AccessDenied(path.to_path_buf()),
        _ => VcacheError::Io(e),
    }
}

fn attr_from_metadata(meta: &std::fs::Metadata) -> Attr {
    let kind = if meta.is_dir() {
        FileKind::Directory
    } else if meta.file_type().is_symlink() {
        FileKind::Symlink
    } else if meta.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    };
    Attr {
        kind,
        size: meta.len(),
        perm: meta.permissions().mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        mtime: meta.modified().unwrap_or(std::time::UNIX_EPOCH),
        atime: meta.accessed().unwrap_or(std::time::UNIX_EPOCH),
        ctime: std::time::UNIX_EPOCH + Duration::from_secs(meta.ctime().max(0) as u64),
    }
}

fn read_dir_entries(dir: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let attr = entry.metadata().ok().map(|m| attr_from_metadata(&m));
        entries.push(DirEntry {
            name: entry.file_name(),
            attr,
        });
    }
    Ok(entries)
}
