//! Normalized root path values with ancestor/descendant comparison.
//!
//! Registry keys must compare equal for any two spellings of the same
//! directory, and overlap checks must be component-wise so `/a/bc` is
//! never mistaken for a descendant of `/a/b`. On case-insensitive
//! filesystems (Windows) the comparison key is case-folded.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An absolute, normalized directory path registered for watching.
///
/// Immutable value, cheap to clone (Arc-backed). Equality, hashing, and
/// ancestor tests all run on the folded form so `watch` callers can pass
/// whatever spelling the OS handed them.
#[derive(Debug, Clone)]
pub struct RootPath {
    inner: Arc<RootPathInner>,
}

#[derive(Debug)]
struct RootPathInner {
    /// The path as the caller will see it back (lexically normalized).
    path: PathBuf,
    /// Comparison key: case-folded on case-insensitive platforms.
    folded: PathBuf,
}

impl RootPath {
    /// Normalize a path into a registry key.
    ///
    /// Lexical only: collapses `.` components and trailing separators.
    /// Does not touch the filesystem, so it never fails; existence is
    /// checked separately by `watch`.
    pub fn normalize(path: &Path) -> Self {
        let path: PathBuf = path.components().collect();
        let folded = fold(&path);
        Self {
            inner: Arc::new(RootPathInner { path, folded }),
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.inner.path
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.inner.path.clone()
    }

    /// True if `other` is equal to or nested under this root.
    ///
    /// Component-wise prefix test; a root is its own ancestor.
    pub fn is_ancestor_of(&self, other: &RootPath) -> bool {
        other.inner.folded.starts_with(&self.inner.folded)
    }

    /// True if either path covers the other (equal counts as overlap).
    pub fn overlaps(&self, other: &RootPath) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }
}

fn fold(path: &Path) -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(path.to_string_lossy().to_lowercase())
    } else {
        path.to_path_buf()
    }
}

impl PartialEq for RootPath {
    fn eq(&self, other: &Self) -> bool {
        self.inner.folded == other.inner.folded
    }
}

impl Eq for RootPath {}

impl Hash for RootPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.folded.hash(state);
    }
}

impl fmt::Display for RootPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.path.display())
    }
}
