//! Namespace paths.
//!
//! Paths are validated component sequences owned by one namespace
//! instance. There is no normalization: `.`, `..` and `...` are rejected
//! when a path is built, never interpreted later.
//!
//! Equality, hashing and ordering fold case on every component and include
//! the owning [`NamespaceId`], so `/A/b` and `/a/B` are the same path in
//! one namespace and never equal to `/a/b` in another.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::error::{VfsError, VfsResult};

/// Path separator, also the textual form of the root.
pub const SEPARATOR: &str = "/";

/// Identity of one namespace instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceId(u64);

impl NamespaceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns-{}", self.0)
    }
}

/// Check a single path component.
///
/// Rejects the empty string, `.`, `..`, `...` and anything containing `/`.
pub fn validate_component(component: &str) -> VfsResult<()> {
    let reason = match component {
        "" => "path components cannot be empty",
        "." => "path components cannot equal '.'",
        ".." => "path components cannot equal '..'",
        "..." => "path components cannot equal '...'",
        c if c.contains(SEPARATOR) => "path components cannot contain '/'",
        _ => return Ok(()),
    };
    Err(VfsError::invalid_path(format!("{reason} (received: {component:?})")))
}

/// Case-insensitive component comparison used for every name lookup.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Case-insensitive component ordering.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

fn hash_names<H: Hasher>(names: &[String], state: &mut H) {
    state.write_usize(names.len());
    for name in names {
        for c in name.chars().flat_map(char::to_lowercase) {
            state.write_u32(c as u32);
        }
        state.write_u8(0xff);
    }
}

fn validate_all<I, S>(components: I) -> VfsResult<Arc<[String]>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: Vec<String> = components.into_iter().map(Into::into).collect();
    for name in &names {
        validate_component(name)?;
    }
    Ok(names.into())
}

/// An absolute path: the root marker followed by zero or more components.
#[derive(Clone)]
pub struct AbsolutePath {
    namespace: NamespaceId,
    names: Arc<[String]>,
}

impl AbsolutePath {
    /// The root path of a namespace.
    pub fn root(namespace: NamespaceId) -> Self {
        Self {
            namespace,
            names: Arc::from(Vec::new()),
        }
    }

    /// Parse `"/" component ("/" component)*`.
    pub fn parse(namespace: NamespaceId, text: &str) -> VfsResult<Self> {
        if text == SEPARATOR {
            return Ok(Self::root(namespace));
        }
        let Some(rest) = text.strip_prefix(SEPARATOR) else {
            return Err(VfsError::invalid_path(format!(
                "absolute paths must begin with {SEPARATOR} (received: {text:?})"
            )));
        };
        Self::from_components(namespace, rest.split(SEPARATOR))
    }

    /// Build from components, excluding the root marker.
    pub fn from_components<I, S>(namespace: NamespaceId, components: I) -> VfsResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            namespace,
            names: validate_all(components)?,
        })
    }

    /// The namespace that owns this path.
    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    /// Components after the root marker.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of components after the root marker.
    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    pub fn is_root(&self) -> bool {
        self.names.is_empty()
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<AbsolutePath> {
        let (_, init) = self.names.split_last()?;
        Some(Self {
            namespace: self.namespace,
            names: init.to_vec().into(),
        })
    }

    /// Last component, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.names.last().map(String::as_str)
    }

    /// Append one validated component.
    pub fn join(&self, component: &str) -> VfsResult<AbsolutePath> {
        validate_component(component)?;
        let mut names = self.names.to_vec();
        names.push(component.to_string());
        Ok(Self {
            namespace: self.namespace,
            names: names.into(),
        })
    }

    /// Case-insensitive prefix test within the same namespace.
    pub fn starts_with(&self, prefix: &AbsolutePath) -> bool {
        self.namespace == prefix.namespace
            && prefix.names.len() <= self.names.len()
            && prefix
                .names
                .iter()
                .zip(self.names.iter())
                .all(|(a, b)| names_equal(a, b))
    }

    /// Resolve another path against this one.
    ///
    /// A relative argument is appended; an absolute argument replaces this
    /// path entirely.
    pub fn resolve(&self, other: &NamespacePath) -> VfsResult<AbsolutePath> {
        match other {
            NamespacePath::Absolute(abs) => {
                self.check_same_namespace(abs.namespace)?;
                Ok(abs.clone())
            }
            NamespacePath::Relative(rel) => self.resolve_relative(rel),
        }
    }

    /// Append every component of a relative path.
    pub fn resolve_relative(&self, other: &RelativePath) -> VfsResult<AbsolutePath> {
        self.check_same_namespace(other.namespace)?;
        let mut names = self.names.to_vec();
        names.extend(other.names.iter().cloned());
        Ok(Self {
            namespace: self.namespace,
            names: names.into(),
        })
    }

    /// The relative path leading from `self` to `other`.
    ///
    /// `self` must be a strict prefix of `other`.
    pub fn relativize(&self, other: &AbsolutePath) -> VfsResult<RelativePath> {
        self.check_same_namespace(other.namespace)?;
        if !other.starts_with(self) || other.names.len() == self.names.len() {
            return Err(VfsError::invalid_path(format!(
                "{other} is not strictly below {self}"
            )));
        }
        Ok(RelativePath {
            namespace: self.namespace,
            names: other.names[self.names.len()..].to_vec().into(),
        })
    }

    fn check_same_namespace(&self, other: NamespaceId) -> VfsResult<()> {
        if other == self.namespace {
            Ok(())
        } else {
            Err(VfsError::cross_namespace(format!(
                "path from {other} used with {}",
                self.namespace
            )))
        }
    }
}

impl fmt::Display for AbsolutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SEPARATOR}{}", self.names.join(SEPARATOR))
    }
}

impl fmt::Debug for AbsolutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AbsolutePath({}:{self})", self.namespace)
    }
}

impl PartialEq for AbsolutePath {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AbsolutePath {}

impl Hash for AbsolutePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        hash_names(&self.names, state);
    }
}

impl PartialOrd for AbsolutePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AbsolutePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.namespace.cmp(&other.namespace).then_with(|| {
            let mut lhs = self.names.iter();
            let mut rhs = other.names.iter();
            loop {
                match (lhs.next(), rhs.next()) {
                    (None, None) => return Ordering::Equal,
                    (None, Some(_)) => return Ordering::Less,
                    (Some(_), None) => return Ordering::Greater,
                    (Some(a), Some(b)) => match compare_names(a, b) {
                        Ordering::Equal => continue,
                        unequal => return unequal,
                    },
                }
            }
        })
    }
}

/// A relative path: one or more components.
#[derive(Clone)]
pub struct RelativePath {
    namespace: NamespaceId,
    names: Arc<[String]>,
}

impl RelativePath {
    /// Parse `component ("/" component)*`.
    pub fn parse(namespace: NamespaceId, text: &str) -> VfsResult<Self> {
        if text.starts_with(SEPARATOR) {
            return Err(VfsError::invalid_path(format!(
                "relative paths cannot begin with {SEPARATOR} (received: {text:?})"
            )));
        }
        Self::from_components(namespace, text.split(SEPARATOR))
    }

    pub fn from_components<I, S>(namespace: NamespaceId, components: I) -> VfsResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = validate_all(components)?;
        if names.is_empty() {
            return Err(VfsError::invalid_path("relative paths cannot be empty"));
        }
        Ok(Self { namespace, names })
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    pub fn file_name(&self) -> &str {
        // from_components guarantees at least one name
        self.names.last().map(String::as_str).unwrap_or_default()
    }

    pub fn join(&self, component: &str) -> VfsResult<RelativePath> {
        validate_component(component)?;
        let mut names = self.names.to_vec();
        names.push(component.to_string());
        Ok(Self {
            namespace: self.namespace,
            names: names.into(),
        })
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names.join(SEPARATOR))
    }
}

impl fmt::Debug for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelativePath({}:{self})", self.namespace)
    }
}

impl PartialEq for RelativePath {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.names.len() == other.names.len()
            && self
                .names
                .iter()
                .zip(other.names.iter())
                .all(|(a, b)| names_equal(a, b))
    }
}

impl Eq for RelativePath {}

impl Hash for RelativePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        hash_names(&self.names, state);
    }
}

/// Either kind of namespace path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamespacePath {
    Absolute(AbsolutePath),
    Relative(RelativePath),
}

impl NamespacePath {
    /// Parse text as absolute if it starts with `/`, otherwise relative.
    pub fn parse(namespace: NamespaceId, text: &str) -> VfsResult<Self> {
        if text.starts_with(SEPARATOR) {
            AbsolutePath::parse(namespace, text).map(NamespacePath::Absolute)
        } else {
            RelativePath::parse(namespace, text).map(NamespacePath::Relative)
        }
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self, NamespacePath::Absolute(_))
    }
}

impl fmt::Display for NamespacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespacePath::Absolute(p) => p.fmt(f),
            NamespacePath::Relative(p) => p.fmt(f),
        }
    }
}

impl From<AbsolutePath> for NamespacePath {
    fn from(p: AbsolutePath) -> Self {
        NamespacePath::Absolute(p)
    }
}

impl From<RelativePath> for NamespacePath {
    fn from(p: RelativePath) -> Self {
        NamespacePath::Relative(p)
    }
}
