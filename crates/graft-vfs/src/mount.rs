//! Mount management.
//!
//! A mount grafts a directory of an external filesystem into the namespace
//! by splicing a mount node in place of whatever was at the mount point.
//! The replaced node is kept as the mount's shadowed node and comes back on
//! unmount. Mounting over an existing mount stacks.

use parking_lot::RwLock;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::lookup::{Lookup, Resolved};
use crate::ops::VfsOps;
use crate::path::AbsolutePath;
use crate::tree::{DirectoryAttributes, MountNode, Node, Tree};

/// A path inside a specific external filesystem.
#[derive(Clone)]
pub struct ExternalPath {
    pub fs: Arc<dyn VfsOps>,
    pub path: PathBuf,
}

impl ExternalPath {
    pub fn new(fs: Arc<dyn VfsOps>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    /// Same filesystem, different path.
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            fs: Arc::clone(&self.fs),
            path: path.into(),
        }
    }
}

impl fmt::Debug for ExternalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalPath")
            .field("fs", &"<dyn VfsOps>")
            .field("path", &self.path)
            .finish()
    }
}

/// A validated request to graft `source` at `mount_at`.
#[derive(Debug, Clone)]
pub struct MountRequest {
    pub source: ExternalPath,
    pub mount_at: AbsolutePath,
}

impl MountRequest {
    /// Validate a mount request.
    ///
    /// The source path must be absolute within its filesystem, and a
    /// namespace cannot be mounted inside itself.
    pub fn new(
        fs: Arc<dyn VfsOps>,
        source: impl Into<PathBuf>,
        mount_at: AbsolutePath,
    ) -> VfsResult<Self> {
        let source: PathBuf = source.into();
        if !source.has_root() {
            return Err(VfsError::invalid_path(format!(
                "mount source must be absolute (received: {})",
                source.display()
            )));
        }
        if fs.namespace_id() == Some(mount_at.namespace()) {
            return Err(VfsError::cross_namespace(format!(
                "cannot mount {} inside itself",
                mount_at.namespace()
            )));
        }
        Ok(Self {
            source: ExternalPath::new(fs, source),
            mount_at,
        })
    }
}

/// One active mount.
#[derive(Debug)]
pub struct MountRecord {
    pub mount_point: AbsolutePath,
    pub source: ExternalPath,
}

/// Snapshot entry of [`MountManager::mounted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedFilesystem {
    pub mount_point: AbsolutePath,
    pub source: PathBuf,
}

/// Active mounts of one namespace.
#[derive(Debug, Default)]
pub struct MountManager {
    records: RwLock<Vec<Arc<MountRecord>>>,
}

impl MountManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graft `request.source` into `tree` at `request.mount_at`.
    pub async fn mount(&self, tree: &Tree, request: MountRequest) -> VfsResult<()> {
        let MountRequest { source, mount_at } = request;
        if mount_at.is_root() {
            return Err(VfsError::permission_denied("cannot mount over the namespace root"));
        }

        let attr = source.fs.getattr(&source.path).await?;
        if !attr.is_dir() {
            return Err(VfsError::not_a_directory(source.path.display().to_string()));
        }

        let (existing, name) = match Lookup::new(tree, &mount_at).resolve().await? {
            Resolved::Directory { id, directory } => (id, directory.name),
            Resolved::Mount { id, mount } => (id, mount.name),
            Resolved::Real(_) => {
                return Err(VfsError::permission_denied(format!(
                    "cannot mount inside an external filesystem: {mount_at}"
                )));
            }
        };

        let record = Arc::new(MountRecord {
            mount_point: mount_at.clone(),
            source,
        });
        let node = Node::Mount(MountNode {
            name,
            record: Arc::clone(&record),
            attributes: DirectoryAttributes::now(),
            shadowed: existing,
        });
        if tree.replace_with(existing, node).is_none() {
            return Err(VfsError::not_found(mount_at.to_string()));
        }

        debug!(
            mount_point = %mount_at,
            source = %record.source.path.display(),
            "mounted"
        );
        self.records.write().push(record);
        Ok(())
    }

    /// Remove the mount at `path`, restoring the node it shadowed.
    pub async fn unmount(&self, tree: &Tree, path: &AbsolutePath) -> VfsResult<()> {
        let (id, mount) = match Lookup::new(tree, path).resolve().await? {
            Resolved::Mount { id, mount } => (id, mount),
            _ => return Err(VfsError::not_a_mount(path.to_string())),
        };
        if !tree.unmount(id) {
            return Err(VfsError::not_a_mount(path.to_string()));
        }

        self.records
            .write()
            .retain(|r| !Arc::ptr_eq(r, &mount.record));
        debug!(mount_point = %path, "unmounted");
        Ok(())
    }

    /// Snapshot of active mounts, oldest first.
    pub fn mounted(&self) -> Vec<MountedFilesystem> {
        self.records
            .read()
            .iter()
            .map(|r| MountedFilesystem {
                mount_point: r.mount_point.clone(),
                source: r.source.path.clone(),
            })
            .collect()
    }
}
