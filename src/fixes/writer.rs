//! Atomic artifact writes

use std::io::Write;
use std::path::Path;

/// Where optimized artifacts are written
pub trait ArtifactWriter: Send + Sync {
    fn write(&self, path: &Path, contents: &str) -> std::io::Result<()>;
}

/// Writes to a temp file in the same directory, then renames it over the
/// target. Readers see the old file or the new one, never a partial write.
/// An existing target keeps its permissions.
#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicWriter;

impl ArtifactWriter for AtomicWriter {
    fn write(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(contents.as_bytes())?;
        match std::fs::metadata(path) {
            Ok(existing) => temp.as_file().set_permissions(existing.permissions())?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mainTemplate.json");
        std::fs::write(&file, "{}").unwrap();

        AtomicWriter.write(&file, "{\"a\": 1}\n").unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "{\"a\": 1}\n");
        // No temp files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_keeps_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mainTemplate.json");
        std::fs::write(&file, "{}").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();

        AtomicWriter.write(&file, "{\"a\": 1}\n").unwrap();
        let mode = std::fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_missing_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gone").join("mainTemplate.json");
        assert!(AtomicWriter.write(&file, "{}").is_err());
    }
}
