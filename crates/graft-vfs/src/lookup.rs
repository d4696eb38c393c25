//! Path resolution.
//!
//! Walks an absolute path from the tree root one component at a time.
//! Virtual directories are searched case-insensitively; at a mount the walk
//! crosses into the external filesystem and continues there through
//! transient [`RealObject`]s, asking the external filesystem whether each
//! step exists.
//!
//! The tree lock is taken per step, never across an external call. A
//! path that continues below a regular file does not exist.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tracing::{trace, warn};

use crate::error::{VfsError, VfsResult};
use crate::mount::ExternalPath;
use crate::path::AbsolutePath;
use crate::tree::{MountNode, Node, NodeId, Tree, VirtualDirectory};

/// A location inside a mounted external filesystem.
#[derive(Debug, Clone)]
pub struct RealObject {
    pub name: String,
    pub external: ExternalPath,
}

/// What a path resolved to.
#[derive(Debug, Clone)]
pub enum Resolved {
    Directory {
        id: NodeId,
        directory: VirtualDirectory,
    },
    Mount {
        id: NodeId,
        mount: MountNode,
    },
    Real(RealObject),
}

impl Resolved {
    pub fn name(&self) -> &str {
        match self {
            Resolved::Directory { directory, .. } => &directory.name,
            Resolved::Mount { mount, .. } => &mount.name,
            Resolved::Real(obj) => &obj.name,
        }
    }

    /// Tree vertex, if the path ended inside the namespace tree.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Resolved::Directory { id, .. } | Resolved::Mount { id, .. } => Some(*id),
            Resolved::Real(_) => None,
        }
    }

    /// External location the path maps to, for mounts and real objects.
    pub fn external(&self) -> Option<&ExternalPath> {
        match self {
            Resolved::Directory { .. } => None,
            Resolved::Mount { mount, .. } => Some(&mount.record.source),
            Resolved::Real(obj) => Some(&obj.external),
        }
    }
}

/// Join `name` onto `base`, accepting only results that are `base` plus
/// exactly that one normal component.
pub fn contained_join(base: &Path, name: &str) -> Option<PathBuf> {
    let joined = base.join(name);
    let rest = joined.strip_prefix(base).ok()?;
    let mut components = rest.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == OsStr::new(name) => Some(joined),
        _ => None,
    }
}

enum Step {
    Node(NodeId, Node),
    Real(RealObject),
}

/// One resolution of one path against one tree.
pub struct Lookup<'a> {
    tree: &'a Tree,
    path: &'a AbsolutePath,
}

impl<'a> Lookup<'a> {
    pub fn new(tree: &'a Tree, path: &'a AbsolutePath) -> Self {
        Self { tree, path }
    }

    /// Resolve the path, failing with `NotFound` on the first missing
    /// component.
    pub async fn resolve(&self) -> VfsResult<Resolved> {
        let root = self.tree.root();
        let Some(root_node) = self.tree.node(root) else {
            return Err(VfsError::not_found(self.path.to_string()));
        };
        let mut step = Step::Node(root, root_node);

        for (depth, name) in self.path.names().iter().enumerate() {
            step = match step {
                // Child id and node are read under one lock so a concurrent
                // mount or unmount is seen whole or not at all.
                Step::Node(id, Node::VirtualDirectory(_)) => match self.tree.child(id, name) {
                    Some((child, node)) => Step::Node(child, node),
                    None => return Err(self.not_found(depth)),
                },
                Step::Node(_, Node::Mount(mount)) => {
                    let source = &mount.record.source;
                    let Some(candidate) = contained_join(&source.path, name) else {
                        return Err(self.traversal_prevented());
                    };
                    self.descend(source.with_path(candidate), name, depth).await?
                }
                Step::Real(obj) => {
                    let candidate = obj.external.path.join(name);
                    self.descend(obj.external.with_path(candidate), name, depth)
                        .await?
                }
            };
        }

        Ok(match step {
            Step::Real(obj) => Resolved::Real(obj),
            Step::Node(id, Node::VirtualDirectory(directory)) => Resolved::Directory { id, directory },
            Step::Node(id, Node::Mount(mount)) => Resolved::Mount { id, mount },
        })
    }

    /// Like [`resolve`](Self::resolve) but a missing path is `Ok(None)`.
    pub async fn resolve_or_missing(&self) -> VfsResult<Option<Resolved>> {
        match self.resolve().await {
            Ok(resolved) => Ok(Some(resolved)),
            Err(VfsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn descend(&self, candidate: ExternalPath, name: &str, depth: usize) -> VfsResult<Step> {
        trace!(path = %self.path, external = %candidate.path.display(), "checking external path");
        match candidate.fs.getattr(&candidate.path).await {
            Ok(_) => Ok(Step::Real(RealObject {
                name: name.to_string(),
                external: candidate,
            })),
            Err(e) if e.is_not_found() || e.is_not_a_directory() => Err(self.not_found(depth)),
            Err(VfsError::PathEscapesRoot(_)) | Err(VfsError::PermissionDenied(_)) => {
                Err(self.traversal_prevented())
            }
            Err(e) => Err(e),
        }
    }

    fn traversal_prevented(&self) -> VfsError {
        warn!(path = %self.path, "path traversal prevented");
        VfsError::permission_denied(format!("path traversal prevented: {}", self.path))
    }

    fn not_found(&self, depth: usize) -> VfsError {
        let prefix = self.path.names()[..=depth].join("/");
        VfsError::not_found(format!("/{prefix}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::mount::MountRecord;
    use crate::path::NamespaceId;
    use crate::tree::DirectoryAttributes;
    use std::sync::Arc;

    struct Fixture {
        ns: NamespaceId,
        tree: Tree,
    }

    impl Fixture {
        fn new() -> Self {
            let ns = NamespaceId::next();
            let tree = Tree::with_root(VirtualDirectory::new("/"));
            let a = tree
                .append_if_name_free(tree.root(), Node::VirtualDirectory(VirtualDirectory::new("Apps")))
                .unwrap();
            tree.append_if_name_free(a, Node::VirtualDirectory(VirtualDirectory::new("b")))
                .unwrap();
            Self { ns, tree }
        }

        fn path(&self, text: &str) -> AbsolutePath {
            AbsolutePath::parse(self.ns, text).unwrap()
        }

        async fn mount_memory(&self, at: &str, fs: Arc<MemoryBackend>, source: &str) {
            let point = self.path(at);
            let existing = match Lookup::new(&self.tree, &point).resolve().await.unwrap() {
                Resolved::Directory { id, .. } => id,
                other => panic!("unexpected {other:?}"),
            };
            let record = Arc::new(MountRecord {
                mount_point: point,
                source: ExternalPath::new(fs, PathBuf::from(source)),
            });
            self.tree
                .replace_with(
                    existing,
                    Node::Mount(MountNode {
                        name: self.tree.node(existing).unwrap().name().to_string(),
                        record,
                        attributes: DirectoryAttributes::now(),
                        shadowed: existing,
                    }),
                )
                .unwrap();
        }
    }

    #[test]
    fn test_contained_join() {
        let base = Path::new("/base");
        assert_eq!(contained_join(base, "a"), Some(PathBuf::from("/base/a")));
        assert_eq!(contained_join(base, ".."), None);
        assert_eq!(contained_join(base, "."), None);
        assert_eq!(contained_join(base, "a/b"), None);
        assert_eq!(contained_join(base, "/etc"), None);
    }

    #[tokio::test]
    async fn test_resolve_virtual() {
        let f = Fixture::new();
        let root = f.path("/");
        assert!(matches!(
            Lookup::new(&f.tree, &root).resolve().await.unwrap(),
            Resolved::Directory { .. }
        ));

        let path = f.path("/apps/B");
        let resolved = Lookup::new(&f.tree, &path).resolve().await.unwrap();
        assert_eq!(resolved.name(), "b");
    }

    #[tokio::test]
    async fn test_resolve_missing() {
        let f = Fixture::new();
        let path = f.path("/apps/missing/deeper");
        let err = Lookup::new(&f.tree, &path).resolve().await.unwrap_err();
        match err {
            VfsError::NotFound(p) => assert_eq!(p, "/apps/missing"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(Lookup::new(&f.tree, &path).resolve_or_missing().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_through_mount() {
        let f = Fixture::new();
        let fs = Arc::new(MemoryBackend::new());
        fs.insert_file("/data/x/a.txt", "Hello X A\n").unwrap();
        f.mount_memory("/apps/b", fs.clone(), "/data").await;

        let mount = f.path("/apps/b");
        assert!(matches!(
            Lookup::new(&f.tree, &mount).resolve().await.unwrap(),
            Resolved::Mount { .. }
        ));

        let file = f.path("/apps/b/x/a.txt");
        match Lookup::new(&f.tree, &file).resolve().await.unwrap() {
            Resolved::Real(obj) => {
                assert_eq!(obj.name, "a.txt");
                assert_eq!(obj.external.path, PathBuf::from("/data/x/a.txt"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let missing = f.path("/apps/b/x/none.txt");
        let err = Lookup::new(&f.tree, &missing).resolve().await.unwrap_err();
        assert!(err.is_not_found());
    }
}
