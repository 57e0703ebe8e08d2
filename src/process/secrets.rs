//! Secrets and per-run scratch space

use secrecy::{ExposeSecret, SecretString};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A credential handed to a validator through its declared channel.
///
/// `Debug` never prints the value.
#[derive(Debug)]
pub struct Secret(SecretString);

impl Clone for Secret {
    fn clone(&self) -> Self {
        Secret::new(self.expose())
    }
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(SecretString::from(value.into()))
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// Process-exclusive scratch directory for one run.
///
/// Created owner-only under the system temp dir with a random name, and
/// removed with everything in it when dropped, on every exit path.
#[derive(Debug)]
pub struct RunScratch {
    dir: TempDir,
}

impl RunScratch {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("armvet-run-").tempdir()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a secret to a fresh owner-only file and return its path
    pub fn write_secret(&self, secret: &Secret) -> std::io::Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix("secret-")
            .tempfile_in(self.dir.path())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(secret.expose().as_bytes())?;
        file.flush()?;
        // The directory owns cleanup from here on.
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(path)
    }
}
