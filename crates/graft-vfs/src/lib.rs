//! # graft-vfs
//!
//! A read-only namespace that grafts independent filesystems into one
//! UNIX-like tree.
//!
//! A namespace starts as a single virtual root directory. Virtual
//! directories can be created, deleted and renamed; external filesystems
//! (anything implementing [`VfsOps`]) are mounted on top of them. Byte
//! content is only ever read, never written.
//!
//! Key components:
//!
//! - [`AbsolutePath`] / [`RelativePath`] - validated, case-insensitive paths
//!   owned by one namespace
//! - [`Tree`] - arena of virtual directories and mount points
//! - [`Lookup`] - walks a path through the tree and into mounted filesystems
//! - [`MountManager`] - grafts and ungrafts external filesystems
//! - [`WatchService`] - polling change notification
//! - [`Namespace`] - the operations surface tying these together
//!
//! ## Design Decisions
//!
//! - **No normalization**: `.`, `..` and `...` components are rejected when a
//!   path is built. Mount boundaries additionally refuse any join that does
//!   not stay inside the mounted directory.
//! - **One lock for the tree**: every structural read or write takes the
//!   same mutex for the duration of one call; resolution that touches an
//!   external filesystem runs outside it.
//! - **Namespaces are filesystems**: a namespace implements [`VfsOps`] and can
//!   be mounted inside another namespace, but never inside itself.

pub mod backends;
mod config;
mod error;
mod lookup;
mod mount;
mod namespace;
mod ops;
mod path;
mod registry;
mod tree;
mod types;
mod watch;

pub use backends::{LocalBackend, MemoryBackend};
pub use config::{MountConfig, NamespaceConfig, WatchConfig};
pub use error::{VfsError, VfsResult};
pub use lookup::{Lookup, RealObject, Resolved, contained_join};
pub use mount::{ExternalPath, MountManager, MountRecord, MountRequest, MountedFilesystem};
pub use namespace::{Namespace, ReadChannel};
pub use ops::{READ_CHUNK, VfsOps};
pub use path::{
    AbsolutePath, NamespaceId, NamespacePath, RelativePath, SEPARATOR, names_equal,
    validate_component,
};
pub use registry::NamespaceRegistry;
pub use tree::{DirectoryAttributes, Edge, MountNode, Node, NodeId, Tree, VirtualDirectory};
pub use types::{AccessMode, DirEntry, FileAttr, FileType, OpenFlags};
pub use watch::{WatchEvent, WatchEventKind, WatchKey, WatchService};
