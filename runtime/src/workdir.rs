//! Process-scoped working directory.
//!
//! Holds every intermediate file of one run: pulled or extracted partition
//! images, the assembled disk and the firmware blob.

use std::path::{Path, PathBuf};

use gom_core::error::Result;
use tempfile::TempDir;

/// Prefix of working directory names under the system temp dir.
const WORKDIR_PREFIX: &str = "gom";

/// A temporary directory owned by exactly one run.
///
/// Dropping it removes the directory silently; [`WorkDir::remove`] reports
/// failures instead.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create a fresh working directory under the system temp dir.
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix(WORKDIR_PREFIX).tempdir()?;
        tracing::debug!(path = %dir.path().display(), "Created working directory");
        Ok(Self { dir })
    }

    /// Create a fresh working directory under `parent`.
    pub fn create_in(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Delete the directory and everything in it.
    pub fn remove(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!(path = %path.display(), "Removed working directory");
        Ok(())
    }

    /// Remove the directory, logging instead of failing.
    pub fn cleanup(self) {
        let path = self.path().to_path_buf();
        if let Err(e) = self.remove() {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove working directory"
            );
        }
    }
}
