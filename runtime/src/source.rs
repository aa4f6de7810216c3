//! Disk source resolution.
//!
//! Turns the operator's source inputs into either a ready raw disk or a set of
//! partition files to assemble. Exactly one mode applies per run, picked by
//! precedence:
//!
//! 1. remote artifact (`--oci`)
//! 2. local bundle archive (`--archive`)
//! 3. discrete partition files (`--mbr`, `--boot`, `--root`, all three)
//! 4. full raw disk image (`--full`)

use std::fmt;
use std::path::{Path, PathBuf};

use gom_core::config::SourceSpec;
use gom_core::error::{MachineError, Result};

use crate::archive::{self, BUNDLE_FILE_NAME};
use crate::disk::PartitionFiles;
use crate::oci::{ArtifactPuller, ArtifactReference, ArtifactSource, RegistryAuth};

/// File name of the assembled disk inside the working directory.
pub const DISK_FILE_NAME: &str = "disk.img";

/// How the disk is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    FullImage,
    PartFiles,
    Archive,
    RemoteArtifact,
}

impl SourceMode {
    /// Pick the mode for `spec`.
    ///
    /// Inputs for several groups are not an error; the highest precedence
    /// group wins. Partially given partition files do not form a group.
    pub fn select(spec: &SourceSpec) -> Result<Self> {
        if spec.artifact().is_some() {
            return Ok(SourceMode::RemoteArtifact);
        }
        if SourceSpec::path(&spec.archive).is_some() {
            return Ok(SourceMode::Archive);
        }
        if part_files(spec).is_some() {
            return Ok(SourceMode::PartFiles);
        }
        if SourceSpec::path(&spec.full).is_some() {
            return Ok(SourceMode::FullImage);
        }

        Err(MachineError::ConfigError(
            "no disk source given: set one of --full, --mbr/--boot/--root, --archive or --oci"
                .to_string(),
        ))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::FullImage => "full image",
            SourceMode::PartFiles => "partition files",
            SourceMode::Archive => "archive",
            SourceMode::RemoteArtifact => "remote artifact",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn part_files(spec: &SourceSpec) -> Option<PartitionFiles> {
    Some(PartitionFiles {
        mbr: SourceSpec::path(&spec.mbr)?.to_path_buf(),
        boot: SourceSpec::path(&spec.boot)?.to_path_buf(),
        root: SourceSpec::path(&spec.root)?.to_path_buf(),
    })
}

/// Outcome of source resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    /// A raw disk that can be booted as-is.
    Ready(PathBuf),
    /// Partition files still to be assembled into `disk`.
    Assemble { parts: PartitionFiles, disk: PathBuf },
}

impl ResolvedSource {
    /// The disk the emulator will boot.
    pub fn disk(&self) -> &Path {
        match self {
            ResolvedSource::Ready(path) => path,
            ResolvedSource::Assemble { disk, .. } => disk,
        }
    }
}

/// Resolves a [`SourceSpec`] inside a working directory.
pub struct SourceResolver<'a> {
    spec: &'a SourceSpec,
    workdir: &'a Path,
    artifacts: Option<&'a dyn ArtifactSource>,
}

impl<'a> SourceResolver<'a> {
    pub fn new(spec: &'a SourceSpec, workdir: &'a Path) -> Self {
        Self {
            spec,
            workdir,
            artifacts: None,
        }
    }

    /// Use `source` instead of a registry client for remote artifacts.
    pub fn with_artifact_source(mut self, source: &'a dyn ArtifactSource) -> Self {
        self.artifacts = Some(source);
        self
    }

    pub async fn resolve(&self) -> Result<ResolvedSource> {
        let mode = SourceMode::select(self.spec)?;
        tracing::info!(mode = %mode, "Selected disk source");

        match mode {
            SourceMode::FullImage => {
                let path = SourceSpec::path(&self.spec.full).ok_or_else(|| {
                    MachineError::ConfigError("full image path is empty".to_string())
                })?;
                Ok(ResolvedSource::Ready(path.to_path_buf()))
            }
            SourceMode::PartFiles => {
                let parts = part_files(self.spec).ok_or_else(|| {
                    MachineError::ConfigError(
                        "--mbr, --boot and --root must all be set".to_string(),
                    )
                })?;
                Ok(self.assemble(parts))
            }
            SourceMode::Archive => {
                let path = SourceSpec::path(&self.spec.archive).ok_or_else(|| {
                    MachineError::ConfigError("archive path is empty".to_string())
                })?;
                let parts = self.unpack_archive(path)?;
                Ok(self.assemble(parts))
            }
            SourceMode::RemoteArtifact => {
                let parts = self.pull_artifact().await?;
                Ok(self.assemble(parts))
            }
        }
    }

    fn assemble(&self, parts: PartitionFiles) -> ResolvedSource {
        ResolvedSource::Assemble {
            parts,
            disk: self.workdir.join(DISK_FILE_NAME),
        }
    }

    fn unpack_archive(&self, path: &Path) -> Result<PartitionFiles> {
        tracing::info!(archive = %path.display(), "Extracting archive");
        let unpacked = archive::extract_file(path)?.unpack(self.workdir)?;
        Ok(unpacked.partitions)
    }

    async fn pull_artifact(&self) -> Result<PartitionFiles> {
        let raw = self.spec.artifact().unwrap_or_default();
        let reference = ArtifactReference::parse(raw)?;

        let files = match self.artifacts {
            Some(source) => source.pull(&reference, self.workdir).await?,
            None => {
                let auth = RegistryAuth::from_credentials(&self.spec.credentials);
                ArtifactPuller::new(auth, self.spec.plain_http)
                    .pull(&reference, self.workdir)
                    .await?
            }
        };

        let bundle = self.workdir.join(BUNDLE_FILE_NAME);
        if files.contains(&bundle) {
            return self.unpack_archive(&bundle);
        }

        let parts = PartitionFiles::in_dir(self.workdir);
        if !parts.exist() {
            tracing::debug!(?files, "Pulled artifact lacks partition images");
            return Err(MachineError::MalformedArchive);
        }
        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::{build_zip, sample_entries};
    use async_trait::async_trait;
    use gom_core::error::ErrorCategory;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Writes canned files instead of talking to a registry.
    struct FakeArtifacts {
        files: Vec<(&'static str, Vec<u8>)>,
        pulled: Arc<Mutex<Vec<String>>>,
    }

    impl FakeArtifacts {
        fn new(files: Vec<(&'static str, Vec<u8>)>) -> (Box<dyn ArtifactSource>, Arc<Mutex<Vec<String>>>) {
            let pulled = Arc::new(Mutex::new(Vec::new()));
            let fake = FakeArtifacts {
                files,
                pulled: pulled.clone(),
            };
            (Box::new(fake), pulled)
        }
    }

    #[async_trait]
    impl ArtifactSource for FakeArtifacts {
        async fn pull(&self, reference: &ArtifactReference, dest_dir: &Path) -> Result<Vec<PathBuf>> {
            self.pulled.lock().unwrap().push(reference.to_string());
            let mut written = Vec::new();
            for (name, data) in &self.files {
                let path = dest_dir.join(name);
                std::fs::write(&path, data)?;
                written.push(path);
            }
            Ok(written)
        }
    }

    fn spec_with_parts() -> SourceSpec {
        SourceSpec {
            mbr: Some("/in/mbr.img".into()),
            boot: Some("/in/boot.img".into()),
            root: Some("/in/root.img".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_select_precedence() {
        let mut spec = spec_with_parts();
        spec.full = Some("/in/full.img".into());
        assert_eq!(SourceMode::select(&spec).unwrap(), SourceMode::PartFiles);

        spec.archive = Some("/in/disk.gaf".into());
        assert_eq!(SourceMode::select(&spec).unwrap(), SourceMode::Archive);

        spec.artifact = Some("ghcr.io/gokrazy/sample:amd64".to_string());
        assert_eq!(SourceMode::select(&spec).unwrap(), SourceMode::RemoteArtifact);
    }

    #[test]
    fn test_select_single_groups() {
        let full = SourceSpec {
            full: Some("/in/full.img".into()),
            ..Default::default()
        };
        assert_eq!(SourceMode::select(&full).unwrap(), SourceMode::FullImage);
        assert_eq!(SourceMode::select(&spec_with_parts()).unwrap(), SourceMode::PartFiles);
    }

    #[test]
    fn test_select_partial_parts_fall_through() {
        let mut spec = spec_with_parts();
        spec.root = None;
        let err = SourceMode::select(&spec).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);

        spec.full = Some("/in/full.img".into());
        assert_eq!(SourceMode::select(&spec).unwrap(), SourceMode::FullImage);
    }

    #[test]
    fn test_select_ignores_empty_values() {
        let spec = SourceSpec {
            full: Some(PathBuf::new()),
            archive: Some(PathBuf::new()),
            artifact: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            SourceMode::select(&spec),
            Err(MachineError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_full_image() {
        let tmp = TempDir::new().unwrap();
        let spec = SourceSpec {
            full: Some("/in/full.img".into()),
            ..Default::default()
        };
        let resolved = SourceResolver::new(&spec, tmp.path()).resolve().await.unwrap();
        assert_eq!(resolved, ResolvedSource::Ready("/in/full.img".into()));
        assert_eq!(resolved.disk(), Path::new("/in/full.img"));
    }

    #[tokio::test]
    async fn test_resolve_part_files() {
        let tmp = TempDir::new().unwrap();
        let spec = spec_with_parts();
        let resolved = SourceResolver::new(&spec, tmp.path()).resolve().await.unwrap();
        match resolved {
            ResolvedSource::Assemble { parts, disk } => {
                assert_eq!(parts.root, PathBuf::from("/in/root.img"));
                assert_eq!(disk, tmp.path().join("disk.img"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_archive() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("bundle.gaf");
        std::fs::write(&archive, build_zip(&sample_entries())).unwrap();
        let workdir = tmp.path().join("work");
        std::fs::create_dir(&workdir).unwrap();

        let spec = SourceSpec {
            archive: Some(archive),
            ..Default::default()
        };
        let resolved = SourceResolver::new(&spec, &workdir).resolve().await.unwrap();
        let ResolvedSource::Assemble { parts, .. } = resolved else {
            panic!("archive mode must assemble");
        };
        assert_eq!(parts, PartitionFiles::in_dir(&workdir));
        assert_eq!(std::fs::read(&parts.mbr).unwrap(), vec![0xEB; 512]);
        assert!(workdir.join("sbom.json").is_file());
    }

    #[tokio::test]
    async fn test_resolve_malformed_archive() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("bundle.gaf");
        let entries: Vec<_> = sample_entries()
            .into_iter()
            .filter(|(name, _)| *name != "sbom.json")
            .collect();
        std::fs::write(&archive, build_zip(&entries)).unwrap();

        let spec = SourceSpec {
            archive: Some(archive),
            ..Default::default()
        };
        let err = SourceResolver::new(&spec, tmp.path())
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, MachineError::MalformedArchive));
    }

    #[tokio::test]
    async fn test_resolve_remote_bundle() {
        let tmp = TempDir::new().unwrap();
        let bundle = build_zip(&sample_entries());
        let (fake, pulled) = FakeArtifacts::new(vec![("disk.gaf", bundle)]);

        let spec = SourceSpec {
            artifact: Some("localhost:5000/gokrazy/sample:amd64".to_string()),
            ..Default::default()
        };
        let resolved = SourceResolver::new(&spec, tmp.path())
            .with_artifact_source(fake.as_ref())
            .resolve()
            .await
            .unwrap();

        assert_eq!(
            *pulled.lock().unwrap(),
            vec!["localhost:5000/gokrazy/sample:amd64".to_string()]
        );
        let ResolvedSource::Assemble { parts, disk } = resolved else {
            panic!("remote mode must assemble");
        };
        assert!(parts.exist());
        assert_eq!(disk, tmp.path().join("disk.img"));
    }

    #[tokio::test]
    async fn test_resolve_remote_plain_layers() {
        let tmp = TempDir::new().unwrap();
        let (fake, _) = FakeArtifacts::new(sample_entries());

        let spec = SourceSpec {
            artifact: Some("ghcr.io/gokrazy/sample:arm64".to_string()),
            ..Default::default()
        };
        let resolved = SourceResolver::new(&spec, tmp.path())
            .with_artifact_source(fake.as_ref())
            .resolve()
            .await
            .unwrap();
        let ResolvedSource::Assemble { parts, .. } = resolved else {
            panic!("remote mode must assemble");
        };
        assert_eq!(parts, PartitionFiles::in_dir(tmp.path()));
    }

    #[tokio::test]
    async fn test_resolve_remote_missing_partitions() {
        let tmp = TempDir::new().unwrap();
        let (fake, _) = FakeArtifacts::new(vec![("root.img", vec![1, 2, 3])]);

        let spec = SourceSpec {
            artifact: Some("ghcr.io/gokrazy/sample:arm64".to_string()),
            ..Default::default()
        };
        let err = SourceResolver::new(&spec, tmp.path())
            .with_artifact_source(fake.as_ref())
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, MachineError::MalformedArchive));
    }

    #[tokio::test]
    async fn test_resolve_remote_invalid_reference() {
        let tmp = TempDir::new().unwrap();
        let (fake, pulled) = FakeArtifacts::new(Vec::new());

        let spec = SourceSpec {
            artifact: Some("sample:latest".to_string()),
            ..Default::default()
        };
        let err = SourceResolver::new(&spec, tmp.path())
            .with_artifact_source(fake.as_ref())
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, MachineError::InvalidReference { .. }));
        assert!(pulled.lock().unwrap().is_empty());
    }
}
