//! Local filesystem backend.
//!
//! Exposes a real directory tree, read-only, with path security to prevent
//! escaping the root directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{VfsError, VfsResult};
use crate::ops::VfsOps;
use crate::types::{DirEntry, FileAttr, FileType};

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/data`, then `read("/x/a.txt")` reads `/srv/data/x/a.txt`.
///
/// Paths are canonicalized before use, so neither `..` nor a symlink can
/// reach outside the root; such paths fail with `PathEscapesRoot`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a local filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a filesystem path to a host path within the root.
    async fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let path = path.strip_prefix("/").unwrap_or(path);
        if path.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        let full = self.root.join(path);
        let canonical = dunce::canonicalize(&full).map_err(VfsError::from)?;

        if !canonical.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }

        Ok(canonical)
    }

    fn file_type(ft: std::fs::FileType) -> FileType {
        if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        }
    }

    /// Convert std::fs::Metadata to FileAttr.
    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        FileAttr {
            size: if meta.is_dir() { 0 } else { meta.len() },
            kind: Self::file_type(meta.file_type()),
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            atime: meta.accessed().ok(),
            ctime: meta.created().ok(),
        }
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path).await?;
        let meta = fs::metadata(&full_path).await.map_err(VfsError::from)?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let full_path = self.resolve(path).await?;
        let meta = fs::metadata(&full_path).await.map_err(VfsError::from)?;
        if !meta.is_dir() {
            return Err(VfsError::not_a_directory(path.display().to_string()));
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path).await.map_err(VfsError::from)?;
        while let Some(entry) = dir.next_entry().await.map_err(VfsError::from)? {
            let file_type = entry.file_type().await.map_err(VfsError::from)?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: Self::file_type(file_type),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let full_path = self.resolve(path).await?;
        if fs::metadata(&full_path).await.map_err(VfsError::from)?.is_dir() {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        }
        let mut file = fs::File::open(&full_path).await.map_err(VfsError::from)?;

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(VfsError::from)?;

        let mut buffer = Vec::with_capacity(size as usize);
        file.take(size as u64)
            .read_to_end(&mut buffer)
            .await
            .map_err(VfsError::from)?;

        Ok(buffer)
    }
}
