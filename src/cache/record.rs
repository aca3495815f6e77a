//! On-disk record format for the durable cache index
//!
//! Each record is a fixed header (tag, record size, mtime, size) followed by
//! a NUL-terminated relative path. The tag is a sanity sentinel: a mismatch
//! (or a `record_size` too small to hold the header) aborts the load rather
//! than reading garbage as if it were a valid entry.

use crate::error::{Result, VcacheError};
use crate::types::CacheEntry;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel written at the start of every record ("CAIT" read little-endian).
pub const RECORD_TAG: u32 = 0x5449_4143;

const HEADER_LEN: usize = 4 + 4 + 8 + 8;

/// Write one cache entry as a length-prefixed record relative to `cache_root`.
pub fn write_record<W: Write>(w: &mut W, entry: &CacheEntry, cache_root: &Path) -> Result<()> {
    let relative = entry
        .path
        .strip_prefix(cache_root)
        .unwrap_or(entry.path.as_path());
    let mut path_bytes = relative.to_string_lossy().into_owned().into_bytes();
    path_bytes.push(0);

    let record_size = (HEADER_LEN + path_bytes.len()) as u32;
    let mtime_secs = entry
        .mtime
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    w.write_all(&RECORD_TAG.to_le_bytes())?;
    w.write_all(&record_size.to_le_bytes())?;
    w.write_all(&mtime_secs.to_le_bytes())?;
    w.write_all(&entry.size.to_le_bytes())?;
    w.write_all(&path_bytes)?;
    Ok(())
}

/// Read one record, resolving its path against `cache_root`.
///
/// Returns `Ok(None)` at a clean end-of-stream. A bad tag or undersized
/// `record_size` is reported as `VcacheError::IndexCorrupt` so the caller can
/// treat the whole index as unusable rather than desynchronized.
pub fn read_record<R: Read>(r: &mut R, cache_root: &Path) -> Result<Option<CacheEntry>> {
    let mut header = [0u8; HEADER_LEN];
    match read_exact_or_eof(r, &mut header)? {
        false => return Ok(None),
        true => {}
    }

    let tag = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let record_size = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let mtime_secs = u64::from_le_bytes(header[8..16].try_into().unwrap());
    let size = u64::from_le_bytes(header[16..24].try_into().unwrap());

    if tag != RECORD_TAG || (record_size as usize) <= HEADER_LEN {
        return Err(VcacheError::IndexCorrupt(format!(
            "bad record header: tag={tag:#x} record_size={record_size}"
        )));
    }

    let path_len = record_size as usize - HEADER_LEN;
    let mut path_bytes = vec![0u8; path_len];
    r.read_exact(&mut path_bytes)?;
    if path_bytes.pop() != Some(0) {
        return Err(VcacheError::IndexCorrupt(
            "path record missing NUL terminator".into(),
        ));
    }
    let relative = PathBuf::from(String::from_utf8_lossy(&path_bytes).into_owned());

    Ok(Some(CacheEntry {
        path: cache_root.join(relative),
        mtime: UNIX_EPOCH + std::time::Duration::from_secs(mtime_secs),
        size,
    }))
}

fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(VcacheError::IndexCorrupt(
                    "truncated record header".into(),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

pub fn mtime_of(meta: &std::fs::Metadata) -> SystemTime {
    meta.modified().unwrap_or(UNIX_EPOCH)
}
