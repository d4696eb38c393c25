//! External filesystem capability.
//!
//! Anything that can be grafted into a namespace implements [`VfsOps`].
//! The namespace only ever reads through this trait: it asks whether a
//! path exists, lists directories, reads bytes and reads attributes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::VfsResult;
use crate::path::NamespaceId;
use crate::types::{DirEntry, FileAttr};

/// Chunk size used by [`VfsOps::read_all`].
pub const READ_CHUNK: u32 = 64 * 1024;

/// Read-only filesystem operations.
///
/// All operations are path-based. Paths are absolute within the
/// filesystem (`/` is its root), and the mount that grafts a filesystem
/// decides which directory of it appears at the mount point.
#[async_trait]
pub trait VfsOps: Send + Sync {
    /// Get file attributes.
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Read directory entries.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes if EOF is reached.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    /// Root directories of this filesystem.
    fn roots(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("/")]
    }

    /// Namespace identity, for filesystems that are themselves namespaces.
    fn namespace_id(&self) -> Option<NamespaceId> {
        None
    }

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        let mut data = Vec::with_capacity(attr.size as usize);
        loop {
            let chunk = self.read(path, data.len() as u64, READ_CHUNK).await?;
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}
