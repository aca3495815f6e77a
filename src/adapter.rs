//! The only module that knows about FUSE
//!
//! Translates `easy_fuser`'s path-identified [`FuseHandler<PathBuf>`] trait
//! to and from [`Mount`]'s plain-Rust operations. No caching or concurrency
//! logic lives here — every method is a thin marshal-and-delegate.

use easy_fuser::prelude::*;
use easy_fuser::templates::DefaultFuseHandler;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::VcacheError;
use crate::mount::Mount;
use crate::types::{Attr, FileKind, StatfsInfo};

pub struct VcacheFsAdapter {
    mount: Arc<Mount>,
    inner: DefaultFuseHandler,
}

impl VcacheFsAdapter {
    pub fn new(mount: Arc<Mount>) -> Self {
        Self {
            mount,
            inner: DefaultFuseHandler::new(),
        }
    }
}

impl FuseHandler<PathBuf> for VcacheFsAdapter {
    fn get_inner(&self) -> &dyn FuseHandler<PathBuf> {
        &self.inner
    }

    fn destroy(&self) {
        self.mount.destroy();
    }

    fn getattr(
        &self,
        _req: &RequestInfo,
        file_id: PathBuf,
        _file_handle: Option<FileHandle>,
    ) -> FuseResult<FileAttribute> {
        let attr = self.mount.getattr(&file_id).map_err(to_fuse_error)?;
        Ok(to_file_attribute(&attr))
    }

    fn open(
        &self,
        _req: &RequestInfo,
        file_id: PathBuf,
        flags: OpenFlags,
    ) -> FuseResult<(FileHandle, FUSEOpenResponseFlags)> {
        let handle = self
            .mount
            .open(&file_id, flags.bits())
            .map_err(to_fuse_error)?;
        Ok((FileHandle::from(handle), FUSEOpenResponseFlags::empty()))
    }

    fn read(
        &self,
        _req: &RequestInfo,
        _file_id: PathBuf,
        file_handle: FileHandle,
        offset: i64,
        size: u32,
        _flags: FUSEOpenFlags,
        _lock_owner: Option<u64>,
    ) -> FuseResult<Vec<u8>> {
        self.mount
            .read(file_handle.into(), size as usize, offset.max(0) as u64)
            .map_err(to_fuse_error)
    }

    fn release(
        &self,
        _req: &RequestInfo,
        _file_id: PathBuf,
        file_handle: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<u64>,
        _flush: bool,
    ) -> FuseResult<()> {
        self.mount.release(file_handle.into()).map_err(to_fuse_error)
    }

    fn access(&self, _req: &RequestInfo, file_id: PathBuf, mask: AccessMask) -> FuseResult<()> {
        self.mount
            .access(&file_id, mask.bits() as i32)
            .map_err(to_fuse_error)
    }

    fn readdir(
        &self,
        _req: &RequestInfo,
        file_id: PathBuf,
        _file_handle: FileHandle,
    ) -> FuseResult<Vec<(OsString, <PathBuf as FileIdType>::MinimalMetadata)>> {
        let entries = self.mount.readdir(&file_id).map_err(to_fuse_error)?;
        Ok(entries
            .into_iter()
            .map(|e| {
                let kind = e
                    .attr
                    .as_ref()
                    .map(|a| to_file_type(a.kind))
                    .unwrap_or(FileType::RegularFile);
                (e.name, kind.into())
            })
            .collect())
    }

    fn statfs(&self, _req: &RequestInfo, file_id: PathBuf) -> FuseResult<StatFs> {
        let info = self.mount.statfs(&file_id).map_err(to_fuse_error)?;
        Ok(to_statfs(info))
    }
}

fn to_fuse_error(e: VcacheError) -> PosixError {
    let errno = e.as_errno();
    if !matches!(e, VcacheError::NotFound(_) | VcacheError::AccessDenied(_)) {
        warn!(error = %e, "vcachefs operation failed");
    }
    PosixError::from(errno)
}

fn to_file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::File => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
        FileKind::Symlink => FileType::Symlink,
        FileKind::Other => FileType::RegularFile,
    }
}

fn to_file_attribute(attr: &Attr) -> FileAttribute {
    FileAttribute {
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: to_file_type(attr.kind),
        perm: attr.perm as u16,
        nlink: 1,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
        ttl: Some(Duration::from_secs(1)),
        generation: None,
    }
}

fn to_statfs(info: StatfsInfo) -> StatFs {
    StatFs {
        total_blocks: info.blocks,
        free_blocks: info.blocks_free,
        available_blocks: info.blocks_available,
        total_files: info.files,
        free_files: info.files_free,
        block_size: info.block_size as u32,
        max_filename_length: info.max_filename_len,
        fragment_size: info.block_size as u32,
    }
}
