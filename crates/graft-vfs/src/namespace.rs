//! The namespace: a tree of virtual directories with external filesystems
//! grafted in at mount points.
//!
//! Every operation checks that the namespace is open and that each path
//! argument was created by this namespace, resolves the path, and then
//! dispatches on what it resolved to.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::backends::LocalBackend;
use crate::config::NamespaceConfig;
use crate::error::{VfsError, VfsResult};
use crate::lookup::{Lookup, Resolved};
use crate::mount::{ExternalPath, MountManager, MountRequest, MountedFilesystem};
use crate::ops::{READ_CHUNK, VfsOps};
use crate::path::{AbsolutePath, NamespaceId, NamespacePath, RelativePath, compare_names};
use crate::tree::{DirectoryAttributes, Node, Tree, VirtualDirectory};
use crate::types::{AccessMode, DirEntry, FileAttr, FileType, OpenFlags};
use crate::watch::{WatchService, WatchShared};

/// One read-only namespace instance.
pub struct Namespace {
    id: NamespaceId,
    config: NamespaceConfig,
    tree: Tree,
    mounts: MountManager,
    watchers: Mutex<Vec<Weak<WatchShared>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Namespace {
    /// Create an empty namespace holding only the root directory.
    pub fn new(config: NamespaceConfig) -> Self {
        let id = NamespaceId::next();
        debug!(namespace = %id, name = %config.name, "namespace created");
        Self {
            id,
            config,
            tree: Tree::with_root(VirtualDirectory::new("/")),
            mounts: MountManager::new(),
            watchers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> NamespaceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn root_path(&self) -> AbsolutePath {
        AbsolutePath::root(self.id)
    }

    /// Root directories. A namespace has exactly one.
    pub fn root_paths(&self) -> Vec<AbsolutePath> {
        vec![self.root_path()]
    }

    /// Parse an absolute path owned by this namespace.
    pub fn path(&self, text: &str) -> VfsResult<AbsolutePath> {
        AbsolutePath::parse(self.id, text)
    }

    /// Parse a relative path owned by this namespace.
    pub fn relative_path(&self, text: &str) -> VfsResult<RelativePath> {
        RelativePath::parse(self.id, text)
    }

    pub fn parse_path(&self, text: &str) -> VfsResult<NamespacePath> {
        NamespacePath::parse(self.id, text)
    }

    /// Byte content is never writable through a namespace.
    pub fn is_read_only(&self) -> bool {
        true
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Close the namespace and every watch service created from it.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) {
        let mut watchers = self.watchers.lock();
        if !self.is_open() {
            return;
        }
        // Watchers stop before the namespace starts refusing their reads.
        for shared in watchers.drain(..).filter_map(|w| w.upgrade()) {
            shared.close();
        }
        self.closed.store(true, Ordering::Release);
        drop(watchers);
        debug!(namespace = %self.id, name = %self.config.name, "namespace closed");
    }

    fn check_open(&self) -> VfsResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(VfsError::Closed)
        }
    }

    pub(crate) fn check_belongs(&self, path: &AbsolutePath) -> VfsResult<()> {
        if path.namespace() == self.id {
            Ok(())
        } else {
            Err(VfsError::cross_namespace(format!(
                "path {path} belongs to {}, not {}",
                path.namespace(),
                self.id
            )))
        }
    }

    fn check(&self, path: &AbsolutePath) -> VfsResult<()> {
        self.check_open()?;
        self.check_belongs(path)
    }

    async fn resolve(&self, path: &AbsolutePath) -> VfsResult<Resolved> {
        Lookup::new(&self.tree, path).resolve().await
    }

    /// List a directory, sorted by name.
    pub async fn list_directory(&self, path: &AbsolutePath) -> VfsResult<Vec<DirEntry>> {
        trace!(path = %path, "list_directory");
        self.check(path)?;

        match self.resolve(path).await? {
            Resolved::Directory { id, .. } => {
                let mut entries: Vec<DirEntry> = self
                    .tree
                    .outgoing_edges_of(id)
                    .into_iter()
                    .map(|edge| DirEntry::directory(edge.child_name))
                    .collect();
                entries.sort_by(|a, b| compare_names(&a.name, &b.name));
                Ok(entries)
            }
            Resolved::Mount { mount, .. } => {
                let source = &mount.record.source;
                source.fs.readdir(&source.path).await
            }
            Resolved::Real(obj) => obj.external.fs.readdir(&obj.external.path).await,
        }
    }

    /// Create one virtual directory. The parent must be a virtual directory.
    pub async fn create_directory(&self, path: &AbsolutePath) -> VfsResult<()> {
        trace!(path = %path, "create_directory");
        self.check(path)?;

        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Ok(());
        };

        match self.resolve(&parent).await? {
            Resolved::Directory { id, .. } => {
                let node = Node::VirtualDirectory(VirtualDirectory::new(name));
                match self.tree.append_if_name_free(id, node) {
                    Some(_) => {
                        debug!(path = %path, "directory created");
                        Ok(())
                    }
                    None => Err(VfsError::already_exists(path.to_string())),
                }
            }
            Resolved::Mount { .. } | Resolved::Real(_) => Err(VfsError::permission_denied(
                format!("cannot create directories inside a mount: {path}"),
            )),
        }
    }

    /// Create a virtual directory and any missing ancestors.
    pub async fn create_directories(&self, path: &AbsolutePath) -> VfsResult<()> {
        trace!(path = %path, "create_directories");
        self.check(path)?;

        let names = path.names();
        for depth in 1..=names.len() {
            let prefix = AbsolutePath::from_components(self.id, names[..depth].iter().cloned())?;
            match Lookup::new(&self.tree, &prefix).resolve_or_missing().await? {
                Some(Resolved::Directory { .. }) => {}
                Some(_) if depth == names.len() => {
                    return Err(VfsError::already_exists(prefix.to_string()));
                }
                Some(_) => {}
                None => match self.create_directory(&prefix).await {
                    Ok(()) | Err(VfsError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }

    /// Delete an empty virtual directory.
    pub async fn delete(&self, path: &AbsolutePath) -> VfsResult<()> {
        trace!(path = %path, "delete");
        self.check(path)?;

        if path.is_root() {
            return Err(VfsError::permission_denied("cannot delete the namespace root"));
        }

        match self.resolve(path).await? {
            Resolved::Directory { id, .. } => {
                if self.tree.delete_if_empty(id) {
                    debug!(path = %path, "directory deleted");
                    Ok(())
                } else if !self.tree.outgoing_edges_of(id).is_empty() {
                    Err(VfsError::directory_not_empty(path.to_string()))
                } else {
                    Err(VfsError::not_found(path.to_string()))
                }
            }
            Resolved::Mount { .. } => Err(VfsError::permission_denied(format!(
                "cannot delete a mount, unmount it instead: {path}"
            ))),
            Resolved::Real(_) => Err(VfsError::permission_denied(format!(
                "cannot delete mounted content: {path}"
            ))),
        }
    }

    /// Check that `path` exists and allows `modes`. Write access is never
    /// granted.
    pub async fn check_access(&self, path: &AbsolutePath, modes: &[AccessMode]) -> VfsResult<()> {
        trace!(path = %path, ?modes, "check_access");
        self.check(path)?;

        self.resolve(path).await?;
        if modes.contains(&AccessMode::Write) {
            return Err(VfsError::ReadOnly);
        }
        Ok(())
    }

    /// Open a file inside a mounted filesystem for reading.
    pub async fn open_read(&self, path: &AbsolutePath, flags: OpenFlags) -> VfsResult<ReadChannel> {
        trace!(path = %path, ?flags, "open_read");
        self.check(path)?;

        let resolved = self.resolve(path).await?;
        if flags.requests_modification() {
            return Err(VfsError::ReadOnly);
        }

        match resolved {
            Resolved::Directory { .. } | Resolved::Mount { .. } => {
                Err(VfsError::is_a_directory(path.to_string()))
            }
            Resolved::Real(obj) => {
                let attr = obj.external.fs.getattr(&obj.external.path).await?;
                if attr.is_dir() {
                    return Err(VfsError::is_a_directory(path.to_string()));
                }
                Ok(ReadChannel::new(obj.external, attr.size))
            }
        }
    }

    /// Read a whole file.
    pub async fn read_all(&self, path: &AbsolutePath) -> VfsResult<Vec<u8>> {
        self.open_read(path, OpenFlags::read())
            .await?
            .read_to_end()
            .await
    }

    pub async fn read_attributes(&self, path: &AbsolutePath) -> VfsResult<FileAttr> {
        trace!(path = %path, "read_attributes");
        self.check(path)?;

        match self.resolve(path).await? {
            Resolved::Directory { directory, .. } => Ok(directory_attr(&directory.attributes)),
            Resolved::Mount { mount, .. } => Ok(directory_attr(&mount.attributes)),
            Resolved::Real(obj) => obj.external.fs.getattr(&obj.external.path).await,
        }
    }

    /// Rename a virtual directory within its parent.
    pub async fn rename(&self, source: &AbsolutePath, target: &AbsolutePath) -> VfsResult<()> {
        trace!(source = %source, target = %target, "rename");
        self.check(source)?;
        self.check_belongs(target)?;

        let (Some(source_parent), Some(target_parent), Some(new_name)) =
            (source.parent(), target.parent(), target.file_name())
        else {
            return Err(VfsError::invalid_path("cannot rename the namespace root"));
        };

        let id = match self.resolve(source).await? {
            Resolved::Directory { id, .. } => id,
            Resolved::Mount { .. } => {
                return Err(VfsError::permission_denied(format!(
                    "cannot rename a mount: {source}"
                )));
            }
            Resolved::Real(_) => {
                return Err(VfsError::permission_denied(format!(
                    "cannot rename mounted content: {source}"
                )));
            }
        };

        if source_parent != target_parent {
            return Err(VfsError::invalid_path(format!(
                "{target} is not in the same directory as {source}"
            )));
        }

        if let Some(existing) = Lookup::new(&self.tree, target).resolve_or_missing().await? {
            // A case-only rename resolves the target to the source itself.
            if existing.node_id() != Some(id) {
                return Err(VfsError::already_exists(target.to_string()));
            }
        }

        self.tree.rename(id, new_name);
        debug!(source = %source, target = %target, "directory renamed");
        Ok(())
    }

    /// Graft an external filesystem into this namespace.
    pub async fn mount(&self, request: MountRequest) -> VfsResult<()> {
        trace!(mount_at = %request.mount_at, "mount");
        self.check(&request.mount_at)?;
        self.mounts.mount(&self.tree, request).await
    }

    pub async fn unmount(&self, path: &AbsolutePath) -> VfsResult<()> {
        trace!(path = %path, "unmount");
        self.check(path)?;
        self.mounts.unmount(&self.tree, path).await
    }

    /// Snapshot of the active mounts.
    pub fn mounted_filesystems(&self) -> Vec<MountedFilesystem> {
        self.mounts.mounted()
    }

    /// Mount every local directory listed in the configuration, creating
    /// the mount points as needed.
    pub async fn mount_configured(&self) -> VfsResult<()> {
        for entry in &self.config.mounts {
            let at = self.path(&entry.at)?;
            self.create_directories(&at).await?;
            let fs = Arc::new(LocalBackend::new(&entry.source));
            self.mount(MountRequest::new(fs, "/", at)?).await?;
        }
        Ok(())
    }

    /// Start a polling watch service over this namespace.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new_watch_service(self: &Arc<Self>) -> VfsResult<WatchService> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| VfsError::other("watch service requires a tokio runtime"))?;

        let mut watchers = self.watchers.lock();
        self.check_open()?;
        let service = WatchService::new(Arc::clone(self), self.config.watch.poll_interval(), handle);
        watchers.retain(|w| w.strong_count() > 0);
        watchers.push(service.downgrade());
        Ok(service)
    }

    /// Parse a filesystem path (as handed to [`VfsOps`]) into a namespace path.
    fn from_fs_path(&self, path: &Path) -> VfsResult<AbsolutePath> {
        let mut names = Vec::new();
        for component in path.components() {
            match component {
                std::path::Component::RootDir => {}
                std::path::Component::Normal(name) => names.push(
                    name.to_str()
                        .ok_or_else(|| VfsError::invalid_path(path.display().to_string()))?
                        .to_string(),
                ),
                _ => return Err(VfsError::invalid_path(path.display().to_string())),
            }
        }
        AbsolutePath::from_components(self.id, names)
    }
}

fn directory_attr(attributes: &DirectoryAttributes) -> FileAttr {
    FileAttr {
        size: 0,
        kind: FileType::Directory,
        mtime: attributes.modified,
        atime: Some(attributes.accessed),
        ctime: Some(attributes.created),
    }
}

/// A positioned reader over one file of a mounted filesystem.
#[derive(Debug)]
pub struct ReadChannel {
    source: ExternalPath,
    size: u64,
    position: u64,
}

impl ReadChannel {
    fn new(source: ExternalPath, size: u64) -> Self {
        Self {
            source,
            size,
            position: 0,
        }
    }

    /// Size at open time.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    /// Read up to `len` bytes at the current position. Empty at EOF.
    pub async fn read(&mut self, len: u32) -> VfsResult<Vec<u8>> {
        let data = self
            .source
            .fs
            .read(&self.source.path, self.position, len)
            .await?;
        self.position += data.len() as u64;
        Ok(data)
    }

    /// Read from the current position to EOF.
    pub async fn read_to_end(&mut self) -> VfsResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size.saturating_sub(self.position) as usize);
        loop {
            let chunk = self.read(READ_CHUNK).await?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }

    /// The external file being read.
    pub fn external_path(&self) -> &Path {
        &self.source.path
    }
}

/// A namespace is itself a filesystem, so it can be mounted inside a
/// different namespace.
#[async_trait]
impl VfsOps for Namespace {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let path = self.from_fs_path(path)?;
        self.read_attributes(&path).await
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let path = self.from_fs_path(path)?;
        self.list_directory(&path).await
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let path = self.from_fs_path(path)?;
        let mut channel = self.open_read(&path, OpenFlags::read()).await?;
        channel.seek(offset);
        channel.read(size).await
    }

    fn namespace_id(&self) -> Option<NamespaceId> {
        Some(self.id)
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;

    fn namespace() -> Namespace {
        Namespace::new(NamespaceConfig::default())
    }

    fn archive() -> Arc<MemoryBackend> {
        let fs = Arc::new(MemoryBackend::new());
        fs.insert_file("/x/a.txt", "Hello X A\n").unwrap();
        fs.insert_file("/y/a.txt", "Hello Y A\n").unwrap();
        fs.insert_dir("/z").unwrap();
        fs
    }

    async fn mounted() -> Namespace {
        let ns = namespace();
        let a = ns.path("/a").unwrap();
        ns.create_directory(&a).await.unwrap();
        ns.mount(MountRequest::new(archive(), "/", a).unwrap())
            .await
            .unwrap();
        ns
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let ns = namespace();
        for name in ["/c", "/B", "/a"] {
            ns.create_directory(&ns.path(name).unwrap()).await.unwrap();
        }
        let names: Vec<_> = ns
            .list_directory(&ns.root_path())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["a", "B", "c"]);
    }

    #[tokio::test]
    async fn test_create_directory_collision() {
        let ns = namespace();
        ns.create_directory(&ns.path("/a").unwrap()).await.unwrap();
        let err = ns.create_directory(&ns.path("/A").unwrap()).await.unwrap_err();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_create_root_is_noop() {
        let ns = namespace();
        ns.create_directory(&ns.root_path()).await.unwrap();
        assert!(ns.list_directory(&ns.root_path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_directories() {
        let ns = namespace();
        ns.create_directory(&ns.path("/a").unwrap()).await.unwrap();
        ns.create_directories(&ns.path("/a/b/c").unwrap()).await.unwrap();
        ns.create_directories(&ns.path("/a/b/c").unwrap()).await.unwrap();
        assert!(ns.read_attributes(&ns.path("/A/B/C").unwrap()).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_create_directories_under_mount() {
        let ns = mounted().await;
        let err = ns
            .create_directories(&ns.path("/a/new/deeper").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let ns = namespace();
        ns.create_directories(&ns.path("/a/b").unwrap()).await.unwrap();

        let a = ns.path("/a").unwrap();
        let err = ns.delete(&a).await.unwrap_err();
        assert!(matches!(err, VfsError::DirectoryNotEmpty(_)));

        ns.delete(&ns.path("/a/b").unwrap()).await.unwrap();
        ns.delete(&a).await.unwrap();
        assert!(ns.read_attributes(&a).await.unwrap_err().is_not_found());

        let err = ns.delete(&ns.root_path()).await.unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_mounted_content_is_read_only() {
        let ns = mounted().await;

        let err = ns.create_directory(&ns.path("/a/k").unwrap()).await.unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));

        let err = ns.delete(&ns.path("/a/x").unwrap()).await.unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));

        let err = ns.delete(&ns.path("/a").unwrap()).await.unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));

        let file = ns.path("/a/x/a.txt").unwrap();
        let err = ns.open_read(&file, OpenFlags::write()).await.unwrap_err();
        assert!(matches!(err, VfsError::ReadOnly));

        let err = ns
            .check_access(&file, &[AccessMode::Read, AccessMode::Write])
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::ReadOnly));
        ns.check_access(&file, &[AccessMode::Read]).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_read_resolves_before_flags() {
        let ns = mounted().await;
        let missing = ns.path("/a/x/none.txt").unwrap();
        let err = ns.open_read(&missing, OpenFlags::write()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_open_directories() {
        let ns = mounted().await;
        for path in ["/a", "/a/x", "/"] {
            let err = ns
                .open_read(&ns.path(path).unwrap(), OpenFlags::read())
                .await
                .unwrap_err();
            assert!(matches!(err, VfsError::IsADirectory(_)), "{path}: {err:?}");
        }
    }

    #[tokio::test]
    async fn test_read_channel() {
        let ns = mounted().await;
        let file = ns.path("/a/x/a.txt").unwrap();
        let mut channel = ns.open_read(&file, OpenFlags::read()).await.unwrap();
        assert_eq!(channel.size(), 10);
        assert_eq!(channel.read(5).await.unwrap(), b"Hello");
        assert_eq!(channel.position(), 5);
        channel.seek(6);
        assert_eq!(channel.read_to_end().await.unwrap(), b"X A\n");
        assert!(channel.read(10).await.unwrap().is_empty());

        assert_eq!(ns.read_all(&file).await.unwrap(), b"Hello X A\n");
    }

    #[tokio::test]
    async fn test_read_attributes() {
        let ns = mounted().await;
        let attr = ns.read_attributes(&ns.path("/a/y/a.txt").unwrap()).await.unwrap();
        assert!(attr.is_file());
        assert_eq!(attr.size, 10);
        assert!(ns.read_attributes(&ns.path("/a").unwrap()).await.unwrap().is_dir());
        assert!(ns.read_attributes(&ns.root_path()).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_rename() {
        let ns = namespace();
        ns.create_directory(&ns.path("/a").unwrap()).await.unwrap();
        ns.create_directory(&ns.path("/b").unwrap()).await.unwrap();

        let err = ns
            .rename(&ns.path("/a").unwrap(), &ns.path("/B").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::AlreadyExists(_)));

        ns.rename(&ns.path("/a").unwrap(), &ns.path("/c").unwrap())
            .await
            .unwrap();
        assert!(ns.read_attributes(&ns.path("/a").unwrap()).await.unwrap_err().is_not_found());
        assert!(ns.read_attributes(&ns.path("/c").unwrap()).await.is_ok());

        ns.rename(&ns.path("/c").unwrap(), &ns.path("/C").unwrap())
            .await
            .unwrap();
        let names: Vec<_> = ns
            .list_directory(&ns.root_path())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["b", "C"]);
    }

    #[tokio::test]
    async fn test_rename_rejections() {
        let ns = mounted().await;
        ns.create_directories(&ns.path("/d/e").unwrap()).await.unwrap();

        let err = ns
            .rename(&ns.root_path(), &ns.path("/q").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::InvalidPath(_)));

        let err = ns
            .rename(&ns.path("/a").unwrap(), &ns.path("/q").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));

        let err = ns
            .rename(&ns.path("/a/x").unwrap(), &ns.path("/a/q").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));

        let err = ns
            .rename(&ns.path("/d/e").unwrap(), &ns.path("/q").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_cross_namespace_paths() {
        let ns0 = namespace();
        let ns1 = namespace();
        let foreign = ns1.path("/a").unwrap();
        let err = ns0.create_directory(&foreign).await.unwrap_err();
        assert!(matches!(err, VfsError::CrossNamespace(_)));
        let err = ns0.list_directory(&ns1.root_path()).await.unwrap_err();
        assert!(matches!(err, VfsError::CrossNamespace(_)));
    }

    #[tokio::test]
    async fn test_closed_namespace() {
        let ns = namespace();
        assert!(ns.is_open());
        ns.close();
        ns.close();
        assert!(!ns.is_open());
        let err = ns.list_directory(&ns.root_path()).await.unwrap_err();
        assert!(matches!(err, VfsError::Closed));
    }

    #[tokio::test]
    async fn test_namespace_as_filesystem() {
        let inner = mounted().await;
        let inner = Arc::new(inner);

        let err = MountRequest::new(inner.clone(), "/", inner.path("/a").unwrap()).unwrap_err();
        assert!(matches!(err, VfsError::CrossNamespace(_)));

        let outer = namespace();
        let at = outer.path("/inner").unwrap();
        outer.create_directory(&at).await.unwrap();
        outer
            .mount(MountRequest::new(inner.clone(), "/a", at).unwrap())
            .await
            .unwrap();

        let file = outer.path("/inner/y/a.txt").unwrap();
        assert_eq!(outer.read_all(&file).await.unwrap(), b"Hello Y A\n");

        let names: Vec<_> = outer
            .list_directory(&outer.path("/inner").unwrap())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["x", "y", "z"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lookup_during_mount_churn() {
        let ns = Arc::new(namespace());
        let a = ns.path("/a").unwrap();
        ns.create_directory(&a).await.unwrap();
        let fs = archive();
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let (ns, done) = (Arc::clone(&ns), Arc::clone(&done));
                tokio::spawn(async move {
                    let path = ns.path("/A").unwrap();
                    while !done.load(Ordering::Acquire) {
                        match Lookup::new(ns.tree(), &path).resolve().await {
                            Ok(Resolved::Directory { .. } | Resolved::Mount { .. }) => {}
                            other => panic!("/a resolved to {other:?}"),
                        }
                        assert!(ns.read_attributes(&path).await.unwrap().is_dir());
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            ns.mount(MountRequest::new(fs.clone(), "/", a.clone()).unwrap())
                .await
                .unwrap();
            ns.unmount(&a).await.unwrap();
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            reader.await.unwrap();
        }
        assert!(ns.mounted_filesystems().is_empty());
        assert_eq!(ns.tree().vertex_count(), 2);
    }
}
