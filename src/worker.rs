//! Background copy pipeline
//!
//! A single thread drains a queue of source-relative paths, copies each one
//! from the source root into the cache root, and splices the resulting
//! descriptor into every handle table entry still open on that path. A timed
//! queue pop doubles as the eviction heartbeat: whenever the queue goes
//! quiet for a few seconds, the worker takes the opportunity to reclaim
//! space instead of waiting for the next open-triggered enqueue.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::CacheIndex;
use crate::table::OpenFileTable;

const COPY_BUFFER_SIZE: usize = 4096;
const IDLE_RECLAIM_INTERVAL: Duration = Duration::from_secs(5);

pub struct CopyWorker {
    queue_tx: Sender<PathBuf>,
    handle: Option<JoinHandle<()>>,
}

impl CopyWorker {
    /// Spawn the background thread. `quit` is shared with the rest of the
    /// mount so shutdown can cooperatively cancel an in-flight copy.
    pub fn spawn(
        source_root: PathBuf,
        cache_root: PathBuf,
        max_cache_size: u64,
        table: Arc<OpenFileTable>,
        index: Arc<RwLock<CacheIndex>>,
        quit: Arc<AtomicBool>,
    ) -> (Self, Sender<PathBuf>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let tx_for_worker = tx.clone();
        let handle = std::thread::Builder::new()
            .name("vcachefs-copy-worker".into())
            .spawn(move || {
                run(
                    rx,
                    source_root,
                    cache_root,
                    max_cache_size,
                    table,
                    index,
                    quit,
                )
            })
            .expect("failed to spawn copy worker thread");
        (
            Self {
                queue_tx: tx_for_worker,
                handle: Some(handle),
            },
            tx,
        )
    }

    pub fn enqueue(&self, relative_path: PathBuf) {
        // The queue is unbounded; a full disconnect only happens once the
        // worker thread itself has exited, which only happens at shutdown.
        let _ = self.queue_tx.send(relative_path);
    }

    /// Block until the worker thread observes the quit flag and exits.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    rx: Receiver<PathBuf>,
    source_root: PathBuf,
    cache_root: PathBuf,
    max_cache_size: u64,
    table: Arc<OpenFileTable>,
    index: Arc<RwLock<CacheIndex>>,
    quit: Arc<AtomicBool>,
) {
    info!("copy worker started");
    loop {
        if quit.load(Ordering::Acquire) {
            break;
        }
        match rx.recv_timeout(IDLE_RECLAIM_INTERVAL) {
            Ok(relative_path) => {
                copy_one(
                    &relative_path,
                    &source_root,
                    &cache_root,
                    &table,
                    &index,
                    &quit,
                );
            }
            Err(RecvTimeoutError::Timeout) => {
                let freed = index.write().reclaim(max_cache_size);
                if freed > 0 {
                    debug!(bytes_freed = freed, "idle-interval reclaim");
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("copy worker exiting");
}

fn copy_one(
    relative_path: &Path,
    source_root: &Path,
    cache_root: &Path,
    table: &OpenFileTable,
    index: &RwLock<CacheIndex>,
    quit: &AtomicBool,
) {
    let source_path = source_root.join(relative_path);
    let dest_path = cache_root.join(relative_path);

    if let Some(parent) = dest_path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warn!(path = %dest_path.display(), error = %e, "copy worker: mkdir failed, dropping item");
        return;
    }

    let mut dest = match File::options()
        .write(true)
        .create_new(true)
        .open(&dest_path)
    {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            // Duplicate enqueue: someone else already copied this path (or
            // is copying it right now). Idempotent no-op.
            debug!(path = %dest_path.display(), "copy worker: already cached, skipping");
            return;
        }
        Err(e) => {
            warn!(path = %dest_path.display(), error = %e, "copy worker: create failed, dropping item");
            return;
        }
    };

    let mut source = match File::open(&source_path) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %source_path.display(), error = %e, "copy worker: source open failed");
            let _ = fs::remove_file(&dest_path);
            return;
        }
    };

    let mut buf = [0u8; COPY_BUFFER_SIZE];
    loop {
        if quit.load(Ordering::Acquire) {
            debug!(path = %dest_path.display(), "copy worker: cancelled mid-copy");
            let _ = fs::remove_file(&dest_path);
            return;
        }
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(path = %source_path.display(), error = %e, "copy worker: read failed");
                let _ = fs::remove_file(&dest_path);
                return;
            }
        };
        if let Err(e) = dest.write_all(&buf[..n]) {
            warn!(path = %dest_path.display(), error = %e, "copy worker: write failed");
            let _ = fs::remove_file(&dest_path);
            return;
        }
    }

    if let Err(e) = dest.seek(SeekFrom::Start(0)) {
        warn!(path = %dest_path.display(), error = %e, "copy worker: rewind failed");
        return;
    }

    table.for_each_matching(relative_path, |entry| {
        if let Ok(dup) = dest.try_clone() {
            let mut state = entry.state.lock();
            state.cache_fd = Some(dup);
            state.cache_cursor = 0;
        }
    });
    drop(dest);

    index.write().notify_added(&dest_path);
    debug!(path = %relative_path.display(), "copy worker: cache fill complete");
}
