//! Optional CSV statistics sink
//!
//! When a mount is configured with a stats path, every notable operation
//! appends one row: `timecode,operation,offset,size,info,pid`. `timecode` is
//! microseconds since the Unix epoch. The sink is threaded through the mount
//! context rather than held as a process-wide global, so tests can construct
//! isolated mounts without stepping on each other.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct StatsSink {
    file: Mutex<File>,
    pid: u32,
}

impl StatsSink {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            pid: std::process::id(),
        })
    }

    pub fn record(&self, operation: &str, offset: u64, size: u64, info: &str) {
        let timecode = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or(0);
        let line = format!(
            "{timecode},{operation},{offset},{size},{info},{pid}\n",
            pid = self.pid
        );
        // Stats are best-effort: a write failure here must never surface to
        // a filesystem caller.
        let _ = self.file.lock().write_all(line.as_bytes());
    }
}
