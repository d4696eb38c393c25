//! In-memory filesystem backend.
//!
//! An opaque, archive-like filesystem: the namespace can only read it, but
//! the owner populates and mutates it through inherent methods. Used for
//! tests and for grafting generated content.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use crate::error::{VfsError, VfsResult};
use crate::ops::VfsOps;
use crate::types::{DirEntry, FileAttr};

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }

    fn attr_mut(&mut self) -> &mut FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<PathBuf, Entry>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(
            PathBuf::new(),
            Entry::Directory {
                attr: FileAttr::directory(SystemTime::now()),
            },
        );
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Normalize a path: remove leading `/`, resolve `.` and `..`.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
            }
        }
        result
    }

    fn path_str(path: &Path) -> String {
        format!("/{}", path.display())
    }

    fn write_lock(&self) -> VfsResult<std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, Entry>>> {
        self.entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))
    }

    fn read_lock(&self) -> VfsResult<std::sync::RwLockReadGuard<'_, HashMap<PathBuf, Entry>>> {
        self.entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))
    }

    /// Create any missing ancestors of `path` as directories.
    fn ensure_parents(entries: &mut HashMap<PathBuf, Entry>, path: &Path) -> VfsResult<()> {
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            if let Component::Normal(s) = component {
                current.push(s);
                match entries.get(&current) {
                    Some(Entry::Directory { .. }) => {}
                    Some(Entry::File { .. }) => {
                        return Err(VfsError::not_a_directory(Self::path_str(&current)));
                    }
                    None => {
                        entries.insert(
                            current.clone(),
                            Entry::Directory {
                                attr: FileAttr::directory(SystemTime::now()),
                            },
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Create or replace a file, creating parent directories as needed.
    pub fn insert_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> VfsResult<()> {
        let normalized = Self::normalize(path.as_ref());
        if normalized.as_os_str().is_empty() {
            return Err(VfsError::is_a_directory("/"));
        }
        let data = data.into();
        let mut entries = self.write_lock()?;
        Self::ensure_parents(&mut entries, &normalized)?;
        if let Some(Entry::Directory { .. }) = entries.get(&normalized) {
            return Err(VfsError::is_a_directory(Self::path_str(&normalized)));
        }
        let attr = FileAttr::file(data.len() as u64, SystemTime::now());
        entries.insert(normalized, Entry::File { data, attr });
        Ok(())
    }

    /// Create a directory and any missing parents. Existing directories are kept.
    pub fn insert_dir(&self, path: impl AsRef<Path>) -> VfsResult<()> {
        let normalized = Self::normalize(path.as_ref());
        let mut entries = self.write_lock()?;
        Self::ensure_parents(&mut entries, &normalized)?;
        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(VfsError::already_exists(Self::path_str(&normalized))),
            None => {
                entries.insert(
                    normalized,
                    Entry::Directory {
                        attr: FileAttr::directory(SystemTime::now()),
                    },
                );
                Ok(())
            }
        }
    }

    /// Remove an entry and everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) -> VfsResult<()> {
        let normalized = Self::normalize(path.as_ref());
        if normalized.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        let mut entries = self.write_lock()?;
        if entries.remove(&normalized).is_none() {
            return Err(VfsError::not_found(Self::path_str(&normalized)));
        }
        entries.retain(|p, _| !p.starts_with(&normalized));
        Ok(())
    }

    /// Set the modification time of an entry.
    pub fn set_mtime(&self, path: impl AsRef<Path>, mtime: SystemTime) -> VfsResult<()> {
        let normalized = Self::normalize(path.as_ref());
        let mut entries = self.write_lock()?;
        match entries.get_mut(&normalized) {
            Some(entry) => {
                entry.attr_mut().mtime = mtime;
                Ok(())
            }
            None => Err(VfsError::not_found(Self::path_str(&normalized))),
        }
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let normalized = Self::normalize(path);
        let entries = self.read_lock()?;
        entries
            .get(&normalized)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(Self::path_str(&normalized)))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let normalized = Self::normalize(path);
        let entries = self.read_lock()?;

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => {
                return Err(VfsError::not_a_directory(Self::path_str(&normalized)));
            }
            None => return Err(VfsError::not_found(Self::path_str(&normalized))),
        }

        let mut result: Vec<DirEntry> = entries
            .iter()
            .filter(|(p, _)| p.parent() == Some(normalized.as_path()))
            .filter_map(|(p, entry)| {
                let name = p.file_name()?.to_string_lossy().into_owned();
                Some(DirEntry::new(name, entry.attr().kind))
            })
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let normalized = Self::normalize(path);
        let entries = self.read_lock()?;

        match entries.get(&normalized) {
            Some(Entry::File { data, .. }) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(size as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Entry::Directory { .. }) => {
                Err(VfsError::is_a_directory(Self::path_str(&normalized)))
            }
            None => Err(VfsError::not_found(Self::path_str(&normalized))),
        }
    }
}
