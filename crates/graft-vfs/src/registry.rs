//! Named namespaces.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::NamespaceConfig;
use crate::error::{VfsError, VfsResult};
use crate::namespace::Namespace;

/// Process-wide table of open namespaces, keyed by name.
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    namespaces: DashMap<String, Arc<Namespace>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the open namespace called `config.name`, creating it if there
    /// is none. The config is ignored when the namespace already exists.
    pub fn create(&self, config: NamespaceConfig) -> Arc<Namespace> {
        let name = config.name.clone();
        let mut entry = self
            .namespaces
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Namespace::new(config.clone())));
        if !entry.is_open() {
            *entry = Arc::new(Namespace::new(config));
        }
        debug!(name = %name, namespace = %entry.id(), "namespace registered");
        Arc::clone(entry.value())
    }

    /// Look up an open namespace.
    pub fn get(&self, name: &str) -> VfsResult<Arc<Namespace>> {
        match self.namespaces.get(name) {
            Some(ns) if ns.is_open() => Ok(Arc::clone(ns.value())),
            _ => Err(VfsError::not_found(format!("namespace {name}"))),
        }
    }

    /// Close and forget a namespace. Returns false if it was not registered.
    pub fn close(&self, name: &str) -> bool {
        match self.namespaces.remove(name) {
            Some((_, ns)) => {
                ns.close();
                true
            }
            None => false,
        }
    }

    /// Names of the open namespaces, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .iter()
            .filter(|entry| entry.is_open())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}
