//! Building a [`ValidationTarget`] from a validated path

use crate::input::{CanonicalPath, Rejection};
use crate::models::{ArtifactKind, ValidationTarget};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Resolve the artifact kind and fingerprint the content.
///
/// An explicit kind must agree with what is on disk: a package root is a
/// directory, everything else a file.
pub fn build_target(
    path: &CanonicalPath,
    kind: Option<ArtifactKind>,
) -> Result<ValidationTarget, TargetError> {
    let is_dir = path.as_path().is_dir();
    let kind = kind.unwrap_or_else(|| ArtifactKind::infer(path.as_path()));
    if is_dir != (kind == ArtifactKind::PackageRoot) {
        return Err(Rejection::invalid(
            "artifact kind",
            format!(
                "{} does not match a {}",
                kind,
                if is_dir { "directory" } else { "file" }
            ),
        )
        .into());
    }

    let (size, content_hash) = if is_dir {
        fingerprint_dir(path)?
    } else {
        let mut hasher = Sha256::new();
        let size = stream_into(path.as_path(), &mut hasher)?;
        (size, format!("{:x}", hasher.finalize()))
    };

    Ok(ValidationTarget {
        path: path.as_path().to_path_buf(),
        kind,
        size,
        content_hash,
    })
}

#[derive(thiserror::Error, Debug)]
pub enum TargetError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Hash over the sorted relative paths and contents of every file in the
/// package. Hidden and git-ignored files are left out.
fn fingerprint_dir(root: &CanonicalPath) -> Result<(u64, String), TargetError> {
    let mut files: Vec<(String, PathBuf)> = ignore::WalkBuilder::new(root.as_path())
        .follow_links(false)
        .git_ignore(true)
        .build()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
        .filter_map(|e| {
            let relative = e.path().strip_prefix(root.as_path()).ok()?;
            Some((
                relative.to_string_lossy().replace('\\', "/"),
                e.path().to_path_buf(),
            ))
        })
        .collect();
    files.sort();

    let mut hasher = Sha256::new();
    let mut size = 0u64;
    for (relative, path) in &files {
        let len = std::fs::metadata(path)
            .map_err(|source| TargetError::Io {
                path: path.clone(),
                source,
            })?
            .len();
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(len.to_le_bytes());
        size += stream_into(path, &mut hasher)?;
    }
    Ok((size, format!("{:x}", hasher.finalize())))
}

/// Feed a file to the hasher in chunks; returns the bytes read
fn stream_into(path: &Path, hasher: &mut Sha256) -> Result<u64, TargetError> {
    let io_err = |source| TargetError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    std::io::copy(&mut file, hasher).map_err(io_err)
}
