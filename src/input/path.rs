//! Path confinement
//!
//! A [`CanonicalPath`] can only be obtained from [`PathGuard::validate_path`],
//! so holding one proves the path existed, was free of traversal sequences,
//! and resolved inside an allowed root at validation time.

use super::{sanitize_for_display, Rejection};
use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// An absolute, symlink-resolved path inside an allowed root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CanonicalPath(PathBuf);

impl CanonicalPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn as_os_str(&self) -> &OsStr {
        self.0.as_os_str()
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Directory to run tools from: the path itself or its parent
    pub fn working_dir(&self) -> CanonicalPath {
        if self.0.is_dir() {
            return self.clone();
        }
        match self.0.parent() {
            Some(parent) => CanonicalPath(parent.to_path_buf()),
            None => self.clone(),
        }
    }

    /// Resolve a child entry that is known to live under this directory.
    ///
    /// `name` must be a single normal path component; the result is
    /// canonicalized and must stay under `self`.
    pub fn child(&self, name: &str) -> Result<CanonicalPath, Rejection> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(Rejection::PathTraversal(sanitize_for_display(name))),
        }
        let joined = self.0.join(name);
        let resolved = joined
            .canonicalize()
            .map_err(|_| Rejection::NotFound(sanitize_for_display(name)))?;
        if !resolved.starts_with(&self.0) {
            return Err(Rejection::OutsideAllowedRoot(sanitize_for_display(name)));
        }
        Ok(CanonicalPath(resolved))
    }
}

impl AsRef<Path> for CanonicalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Confines paths to an explicit allow-list of roots
#[derive(Debug, Clone)]
pub struct PathGuard {
    roots: Vec<PathBuf>,
}

impl PathGuard {
    /// Build a guard over the given roots.
    ///
    /// Roots are canonicalized here; roots that do not exist are dropped
    /// (they could never contain a valid target anyway).
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .filter_map(|r| match r.as_ref().canonicalize() {
                Ok(root) => Some(root),
                Err(e) => {
                    debug!("Dropping allowed root {:?}: {}", r.as_ref(), e);
                    None
                }
            })
            .collect();
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Validate an untrusted path.
    ///
    /// Lexical `..` components are rejected before the file system is
    /// touched, so `../../etc/passwd` is a traversal even when it exists.
    ///
    /// Rejections, in the order they are checked:
    /// - `InvalidFormat`: empty input or an embedded NUL byte
    /// - `PathTraversal`: a `..` component
    /// - `NotFound`: canonicalization failed
    /// - `OutsideAllowedRoot`: the resolved path is under no allowed root
    pub fn validate_path(&self, raw: impl AsRef<Path>) -> Result<CanonicalPath, Rejection> {
        let raw = raw.as_ref();
        let shown = sanitize_for_display(&raw.to_string_lossy());

        if raw.as_os_str().is_empty() {
            return Err(Rejection::invalid("path", "empty path"));
        }
        if raw.to_string_lossy().contains('\0') {
            return Err(Rejection::invalid("path", "embedded NUL byte"));
        }
        if raw.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(Rejection::PathTraversal(shown));
        }

        let canonical = raw
            .canonicalize()
            .map_err(|_| Rejection::NotFound(shown.clone()))?;

        // Invariant: the canonical form carries no parent components.
        if canonical
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Rejection::PathTraversal(shown));
        }

        if !self.roots.iter().any(|root| canonical.starts_with(root)) {
            return Err(Rejection::OutsideAllowedRoot(shown));
        }

        Ok(CanonicalPath(canonical))
    }
}
