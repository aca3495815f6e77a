//! Per-read dispatch between cache and source descriptors
//!
//! Preserves sequential-read locality: a descriptor's cursor is compared
//! against the requested offset before deciding whether to seek, so the
//! common case (sequential streaming) costs no extra syscall.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::warn;

use crate::table::HandleEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Cache,
    Source,
}

/// Read up to `buf.len()` bytes at `offset` from `handle`'s preferred
/// descriptor: cache if present, source otherwise. Never blocks on a copy in
/// flight — the cache becomes visible only once the worker's splice step has
/// run.
///
/// A cache-side read error is absorbed, not surfaced: the cache is a soft
/// layer, so a failure there falls through to the source read the same way
/// an absent `cache_fd` would, and only a source-side error ever reaches the
/// caller.
pub fn route_read(entry: &HandleEntry, buf: &mut [u8], offset: u64) -> io::Result<(usize, ReadSource)> {
    let mut state = entry.state.lock();

    if state.cache_fd.is_some() {
        let cursor = state.cache_cursor;
        let fd = state.cache_fd.as_mut().unwrap();
        match positioned_read(fd, cursor, buf, offset) {
            Ok(n) => {
                state.cache_cursor = offset + n as u64;
                return Ok((n, ReadSource::Cache));
            }
            Err(e) => {
                warn!(
                    path = %entry.relative_path.display(),
                    error = %e,
                    "cache read failed, falling back to source"
                );
            }
        }
    }

    let cursor = state.source_cursor;
    let n = positioned_read(&mut state.source_fd, cursor, buf, offset)?;
    state.source_cursor = offset + n as u64;
    Ok((n, ReadSource::Source))
}

fn positioned_read(fd: &mut File, cursor: u64, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    if cursor != offset {
        fd.seek(SeekFrom::Start(offset))?;
    }
    read_fully_or_eof(fd, buf)
}

fn read_fully_or_eof(fd: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match fd.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(contents: &[u8]) -> File {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        f.flush().unwrap();
        f.reopen().unwrap()
    }

    #[test]
    fn sequential_reads_avoid_reseek_but_still_return_correct_bytes() {
        let source = file_with(b"hello world");
        let entry = HandleEntry::new(4, "x".into(), source);

        let mut buf = [0u8; 5];
        let (n, src) = route_read(&entry, &mut buf, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(src, ReadSource::Source);

        let mut buf2 = [0u8; 6];
        let (n2, _) = route_read(&entry, &mut buf2, 5).unwrap();
        assert_eq!(n2, 6);
        assert_eq!(&buf2, b" world");
    }

    #[test]
    fn prefers_cache_descriptor_once_present() {
        let source = file_with(b"source-data");
        let entry = HandleEntry::new(4, "x".into(), source);
        {
            let mut state = entry.state.lock();
            state.cache_fd = Some(file_with(b"cached-data"));
        }
        let mut buf = [0u8; 6];
        let (n, src) = route_read(&entry, &mut buf, 0).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf, b"cached");
        assert_eq!(src, ReadSource::Cache);
    }

    #[test]
    fn falls_back_to_source_when_cache_read_fails() {
        use tempfile::tempdir;

        let source = file_with(b"source-data");
        let entry = HandleEntry::new(4, "x".into(), source);
        {
            // A directory fd fails to `read`, simulating a cache-side I/O
            // error without fabricating a custom error type.
            let broken_cache_dir = tempdir().unwrap();
            let broken_cache_fd = File::open(broken_cache_dir.path()).unwrap();
            let mut state = entry.state.lock();
            state.cache_fd = Some(broken_cache_fd);
        }

        let mut buf = [0u8; 6];
        let (n, src) = route_read(&entry, &mut buf, 0).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf, b"source");
        assert_eq!(src, ReadSource::Source, "cache I/O error must fall through to source, not propagate");
    }
}
