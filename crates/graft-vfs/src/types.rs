//! Core namespace types.
//!
//! Attributes and directory entries are path-based (no inodes) and are the
//! same shape whether they describe a virtual directory, a mount point or
//! an object inside an external filesystem.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Object attributes.
///
/// Virtual directories and mount points report `size == 0` and the
/// timestamps the namespace tree keeps for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last access time (optional).
    pub atime: Option<SystemTime>,
    /// Creation time (optional).
    pub ctime: Option<SystemTime>,
}

impl FileAttr {
    /// Attributes for a regular file modified at `mtime`.
    pub fn file(size: u64, mtime: SystemTime) -> Self {
        Self {
            size,
            kind: FileType::File,
            mtime,
            atime: Some(mtime),
            ctime: Some(mtime),
        }
    }

    /// Attributes for a directory modified at `mtime`.
    pub fn directory(mtime: SystemTime) -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            mtime,
            atime: Some(mtime),
            ctime: Some(mtime),
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

/// Open flags for [`Namespace::open_read`](crate::Namespace::open_read).
///
/// Only plain reads are ever granted; any other flag makes the open fail
/// with `ReadOnly` once the path has resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write access (also enables read).
    pub fn write() -> Self {
        Self {
            write: true,
            ..Default::default()
        }
    }

    /// Create and truncate.
    pub fn create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// True when any flag other than `read` is set.
    pub fn requests_modification(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }
}

/// Access modes for [`Namespace::check_access`](crate::Namespace::check_access).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}
