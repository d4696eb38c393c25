//! External filesystem backends.
//!
//! Backends implement [`VfsOps`](crate::VfsOps) and are grafted into a
//! namespace with a mount.

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
