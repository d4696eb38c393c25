//! Namespace tree.
//!
//! The tree is an arena of vertices addressed by [`NodeId`]. Each vertex
//! holds its node, a parent link and an ordered child list. Every method
//! takes the single tree lock for the duration of one call; callers only
//! ever see copies.
//!
//! A vertex displaced by a mount stays in the arena, detached, until the
//! mount is removed and the vertex is spliced back in with its original
//! identity.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::mount::MountRecord;
use crate::path::names_equal;

/// Stable handle of a tree vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// Timestamps of a virtual directory or mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryAttributes {
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

impl DirectoryAttributes {
    pub fn now() -> Self {
        let now = SystemTime::now();
        Self {
            created: now,
            accessed: now,
            modified: now,
        }
    }
}

/// An in-memory directory with no backing storage.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualDirectory {
    pub name: String,
    pub attributes: DirectoryAttributes,
    pub shadowed: Option<NodeId>,
}

impl VirtualDirectory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: DirectoryAttributes::now(),
            shadowed: None,
        }
    }
}

/// The root of a grafted external filesystem.
#[derive(Debug, Clone)]
pub struct MountNode {
    pub name: String,
    pub record: Arc<MountRecord>,
    pub attributes: DirectoryAttributes,
    /// The vertex this mount replaced.
    pub shadowed: NodeId,
}

impl PartialEq for MountNode {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && Arc::ptr_eq(&self.record, &other.record)
            && self.attributes == other.attributes
            && self.shadowed == other.shadowed
    }
}

/// A tree vertex.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    VirtualDirectory(VirtualDirectory),
    Mount(MountNode),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::VirtualDirectory(d) => &d.name,
            Node::Mount(m) => &m.name,
        }
    }

    pub fn attributes(&self) -> &DirectoryAttributes {
        match self {
            Node::VirtualDirectory(d) => &d.attributes,
            Node::Mount(m) => &m.attributes,
        }
    }

    fn attributes_mut(&mut self) -> &mut DirectoryAttributes {
        match self {
            Node::VirtualDirectory(d) => &mut d.attributes,
            Node::Mount(m) => &mut m.attributes,
        }
    }

    fn set_name(&mut self, name: String) {
        match self {
            Node::VirtualDirectory(d) => d.name = name,
            Node::Mount(m) => m.name = name,
        }
    }

    pub fn is_mount(&self) -> bool {
        matches!(self, Node::Mount(_))
    }
}

/// A parent to child naming edge, copied out of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub parent: NodeId,
    pub child: NodeId,
    pub child_name: String,
}

#[derive(Debug)]
struct Vertex {
    node: Node,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct TreeInner {
    root: NodeId,
    next_id: u64,
    vertices: HashMap<NodeId, Vertex>,
}

impl TreeInner {
    fn allocate(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn is_attached(&self, id: NodeId) -> bool {
        id == self.root
            || self
                .vertices
                .get(&id)
                .is_some_and(|v| v.parent.is_some())
    }

    fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let vertex = self.vertices.get(&parent)?;
        vertex.children.iter().copied().find(|child| {
            self.vertices
                .get(child)
                .is_some_and(|v| names_equal(v.node.name(), name))
        })
    }

    /// Put `replacement` where `existing` is: same parent slot, same children.
    /// `existing` is left detached with no children.
    fn splice(&mut self, existing: NodeId, replacement: NodeId) {
        let (parent, children) = match self.vertices.get_mut(&existing) {
            Some(v) => (v.parent.take(), std::mem::take(&mut v.children)),
            None => return,
        };

        for child in &children {
            if let Some(v) = self.vertices.get_mut(child) {
                v.parent = Some(replacement);
            }
        }

        if let Some(v) = self.vertices.get_mut(&replacement) {
            v.parent = parent;
            v.children = children;
        }

        match parent {
            Some(p) => {
                let slot = self
                    .vertices
                    .get_mut(&p)
                    .and_then(|pv| pv.children.iter_mut().find(|c| **c == existing));
                if let Some(slot) = slot {
                    *slot = replacement;
                }
            }
            None if self.root == existing => self.root = replacement,
            None => {}
        }
    }
}

/// The structure of one namespace.
#[derive(Debug)]
pub struct Tree {
    inner: Mutex<TreeInner>,
}

impl Tree {
    /// Create a tree holding only `root`.
    pub fn with_root(root: VirtualDirectory) -> Self {
        let root_id = NodeId(0);
        let mut vertices = HashMap::new();
        vertices.insert(
            root_id,
            Vertex {
                node: Node::VirtualDirectory(root),
                parent: None,
                children: Vec::new(),
            },
        );
        Self {
            inner: Mutex::new(TreeInner {
                root: root_id,
                next_id: 1,
                vertices,
            }),
        }
    }

    pub fn root(&self) -> NodeId {
        self.inner.lock().root
    }

    /// Snapshot of a node, `None` if it no longer exists.
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.inner.lock().vertices.get(&id).map(|v| v.node.clone())
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.inner.lock().vertices.get(&id).and_then(|v| v.parent)
    }

    /// True if `id` is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.inner.lock().is_attached(id)
    }

    /// Case-insensitive child lookup.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.inner.lock().find_child(parent, name)
    }

    /// Case-insensitive child lookup returning the child's node as well.
    pub fn child(&self, parent: NodeId, name: &str) -> Option<(NodeId, Node)> {
        let inner = self.inner.lock();
        let id = inner.find_child(parent, name)?;
        let node = inner.vertices.get(&id)?.node.clone();
        Some((id, node))
    }

    /// Insert `node` under `parent` unless a sibling already has its name.
    ///
    /// Returns the new vertex, or `None` when the name is taken or the
    /// parent is gone.
    pub fn append_if_name_free(&self, parent: NodeId, node: Node) -> Option<NodeId> {
        let mut inner = self.inner.lock();
        if !inner.is_attached(parent) || inner.find_child(parent, node.name()).is_some() {
            return None;
        }

        let id = inner.allocate();
        inner.vertices.insert(
            id,
            Vertex {
                node,
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        if let Some(pv) = inner.vertices.get_mut(&parent) {
            pv.children.push(id);
            pv.node.attributes_mut().modified = SystemTime::now();
        }
        Some(id)
    }

    /// Remove a childless, non-root virtual directory.
    pub fn delete_if_empty(&self, id: NodeId) -> bool {
        let mut inner = self.inner.lock();
        if id == inner.root {
            return false;
        }
        let parent = match inner.vertices.get(&id) {
            Some(Vertex {
                node: Node::VirtualDirectory(_),
                parent: Some(parent),
                children,
            }) if children.is_empty() => *parent,
            _ => return false,
        };

        inner.vertices.remove(&id);
        if let Some(pv) = inner.vertices.get_mut(&parent) {
            pv.children.retain(|c| *c != id);
            pv.node.attributes_mut().modified = SystemTime::now();
        }
        true
    }

    /// Put `node` in place of `existing`, taking over its parent slot and
    /// children.
    ///
    /// `existing` stays in the arena when `node` is a mount shadowing it;
    /// otherwise it is dropped.
    pub fn replace_with(&self, existing: NodeId, node: Node) -> Option<NodeId> {
        let mut inner = self.inner.lock();
        if !inner.is_attached(existing) {
            return None;
        }
        let keeps_existing = match &node {
            Node::Mount(m) => m.shadowed == existing,
            Node::VirtualDirectory(d) => d.shadowed == Some(existing),
        };

        let id = inner.allocate();
        inner.vertices.insert(
            id,
            Vertex {
                node,
                parent: None,
                children: Vec::new(),
            },
        );
        inner.splice(existing, id);
        if !keeps_existing {
            inner.vertices.remove(&existing);
        }
        Some(id)
    }

    /// Splice a mount's shadowed vertex back in and drop the mount.
    pub fn unmount(&self, mount: NodeId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_attached(mount) {
            return false;
        }
        let shadowed = match inner.vertices.get(&mount) {
            Some(Vertex {
                node: Node::Mount(m),
                ..
            }) => m.shadowed,
            _ => return false,
        };
        if !inner.vertices.contains_key(&shadowed) {
            return false;
        }

        inner.splice(mount, shadowed);
        inner.vertices.remove(&mount);
        true
    }

    /// Change a vertex's name in place. Sibling collisions are not checked.
    pub fn rename(&self, id: NodeId, new_name: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        match inner.vertices.get_mut(&id) {
            Some(v) => {
                v.node.set_name(new_name.into());
                v.node.attributes_mut().modified = SystemTime::now();
                true
            }
            None => false,
        }
    }

    /// Copy of the outgoing edges of `parent`, in insertion order.
    pub fn outgoing_edges_of(&self, parent: NodeId) -> Vec<Edge> {
        let inner = self.inner.lock();
        let Some(vertex) = inner.vertices.get(&parent) else {
            return Vec::new();
        };
        vertex
            .children
            .iter()
            .filter_map(|child| {
                inner.vertices.get(child).map(|v| Edge {
                    parent,
                    child: *child,
                    child_name: v.node.name().to_string(),
                })
            })
            .collect()
    }

    /// Number of vertices in the arena, detached ones included.
    pub fn vertex_count(&self) -> usize {
        self.inner.lock().vertices.len()
    }
}
