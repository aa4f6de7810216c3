//! OCI artifact support.
//!
//! Disk images can be distributed as OCI artifacts: a manifest whose layers
//! are plain files (the partition images, or a single bundle archive), each
//! named by its `org.opencontainers.image.title` annotation.
//!
//! ```text
//! registry/repository:tag
//!   └── manifest
//!       ├── layer  title=mbr.img
//!       ├── layer  title=boot.img
//!       ├── layer  title=root.img
//!       └── layer  title=sbom.json
//! ```

pub mod reference;
pub mod registry;

pub use reference::ArtifactReference;
pub use registry::{layer_title, ArtifactPuller, RegistryAuth, TITLE_ANNOTATION};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gom_core::error::Result;

/// Something that can materialize an artifact's files in a local directory.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Download every file of `reference` into `dest_dir`, returning the
    /// written paths.
    async fn pull(&self, reference: &ArtifactReference, dest_dir: &Path) -> Result<Vec<PathBuf>>;
}
