//! One complete run: resolve the disk, assemble it, build the command and
//! supervise the emulator.

use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;

use gom_core::config::MachineConfig;
use gom_core::error::Result;

use crate::disk::DiskAssembler;
use crate::oci::ArtifactSource;
use crate::qemu::launcher::find_binary_in;
use crate::qemu::{emulator_binary, LaunchPlan, NetworkPlan, QemuLauncher};
use crate::source::{ResolvedSource, SourceResolver};
use crate::supervisor::{Supervisor, Termination};
use crate::workdir::WorkDir;

/// A configured machine, ready to run.
pub struct Machine {
    config: MachineConfig,
    launcher: QemuLauncher,
    artifacts: Option<Box<dyn ArtifactSource>>,
    search_path: Option<OsString>,
    workdir_parent: Option<PathBuf>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            launcher: QemuLauncher::new(),
            artifacts: None,
            search_path: std::env::var_os("PATH"),
            workdir_parent: None,
        }
    }

    pub fn with_launcher(mut self, launcher: QemuLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_artifact_source(mut self, source: Box<dyn ArtifactSource>) -> Self {
        self.artifacts = Some(source);
        self
    }

    /// Search `path` instead of `PATH` for the emulator.
    pub fn with_search_path(mut self, path: OsString) -> Self {
        self.search_path = Some(path);
        self
    }

    /// Create working directories under `parent` instead of the temp dir.
    pub fn with_workdir_parent(mut self, parent: PathBuf) -> Self {
        self.workdir_parent = Some(parent);
        self
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Run the machine until the emulator exits or `cancel` resolves.
    ///
    /// `cancel` is raced against preparation as well, so a shutdown request
    /// during a pull or assembly stops the run. The working directory is
    /// removed on every path, including errors.
    pub async fn run<F>(self, cancel: F) -> Result<Termination>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;

        let workdir = match &self.workdir_parent {
            Some(parent) => WorkDir::create_in(parent)?,
            None => WorkDir::create()?,
        };

        tokio::pin!(cancel);
        let prepared = tokio::select! {
            plan = self.prepare(&workdir) => Some(plan),
            _ = &mut cancel => None,
        };

        let plan = match prepared {
            Some(Ok(plan)) => plan,
            Some(Err(e)) => {
                workdir.cleanup();
                return Err(e);
            }
            None => {
                tracing::info!("Shutdown requested before the emulator started");
                workdir.cleanup();
                return Ok(Termination::Cancelled);
            }
        };

        println!("{plan}");
        tracing::info!(
            name = %self.config.name,
            arch = %self.config.arch,
            "Starting emulator"
        );

        Supervisor::run(&plan, workdir, &mut cancel).await
    }

    /// Everything up to, but not including, spawning the emulator.
    pub async fn prepare(&self, workdir: &WorkDir) -> Result<LaunchPlan> {
        // Fail on host problems before any download or copy
        let network = NetworkPlan::for_host(&self.config.network)?;
        let binary = find_binary_in(emulator_binary(self.config.arch), self.search_path.clone())?;
        let firmware = self
            .launcher
            .stage_firmware(self.config.arch, workdir.path())?;

        let mut resolver = SourceResolver::new(&self.config.source, workdir.path());
        if let Some(source) = &self.artifacts {
            resolver = resolver.with_artifact_source(source.as_ref());
        }
        let source = resolver.resolve().await?;

        if let ResolvedSource::Assemble { parts, disk } = &source {
            DiskAssembler::new(self.config.layout).assemble(parts, disk)?;
        }

        let mut plan = self
            .launcher
            .plan(&self.config, source.disk(), &network, firmware.as_deref())?;
        plan.program = binary;

        tracing::debug!(plan = %serde_json::to_string(&plan)?, "Launch plan ready");
        Ok(plan)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::oci::ArtifactReference;
    use crate::qemu::firmware::tests::StaticFirmware;
    use async_trait::async_trait;
    use gom_core::config::{Arch, DiskLayout, NetworkSpec, PortForward, SourceSpec};
    use gom_core::error::MachineError;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    /// Install an executable script named after the emulator for `arch`.
    fn fake_emulator(dir: &Path, arch: Arch, script: &str) -> OsString {
        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let exe = bin.join(emulator_binary(arch));
        std::fs::write(&exe, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        bin.into_os_string()
    }

    fn config(source: SourceSpec) -> MachineConfig {
        MachineConfig {
            name: "gom-test001".to_string(),
            source,
            network: NetworkSpec {
                nat: Some(vec![PortForward {
                    host: 18080,
                    guest: 80,
                }]),
                shared: None,
            },
            layout: DiskLayout {
                boot_offset: MIB,
                root_offset: 2 * MIB,
                capacity: 16 * MIB,
            },
            ..Default::default()
        }
    }

    fn part_files(dir: &Path) -> SourceSpec {
        let write = |name: &str, data: &[u8]| {
            let path = dir.join(name);
            std::fs::write(&path, data).unwrap();
            Some(path)
        };
        SourceSpec {
            mbr: write("in-mbr.img", &[0x11; 512]),
            boot: write("in-boot.img", &[0x22; 4096]),
            root: write("in-root.img", &[0x33; 8192]),
            ..Default::default()
        }
    }

    /// Writes one layer, then never finishes the pull.
    struct StalledArtifacts;

    #[async_trait]
    impl ArtifactSource for StalledArtifacts {
        async fn pull(&self, _reference: &ArtifactReference, dest_dir: &Path) -> Result<Vec<PathBuf>> {
            std::fs::write(dest_dir.join("root.img"), [0x33; 4096])?;
            std::future::pending().await
        }
    }

    fn is_empty_dir(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_prepare_assembles_part_files() {
        let tmp = TempDir::new().unwrap();
        let search = fake_emulator(tmp.path(), Arch::Amd64, "exit 0");
        let machine = Machine::new(config(part_files(tmp.path()))).with_search_path(search);

        let workdir = WorkDir::create_in(tmp.path()).unwrap();
        let plan = machine.prepare(&workdir).await.unwrap();

        let disk = workdir.join("disk.img");
        assert_eq!(std::fs::metadata(&disk).unwrap().len(), 16 * MIB);
        assert!(plan
            .args
            .contains(&format!("file={},format=raw", disk.display())));
        assert_eq!(plan.program, tmp.path().join("bin/qemu-system-x86_64"));
    }

    #[tokio::test]
    async fn test_prepare_arm64_firmware() {
        let tmp = TempDir::new().unwrap();
        let search = fake_emulator(tmp.path(), Arch::Arm64, "exit 0");
        let mut config = config(SourceSpec {
            full: Some(tmp.path().join("full.img")),
            ..Default::default()
        });
        config.arch = Arch::Arm64;

        let machine = Machine::new(config)
            .with_search_path(search)
            .with_launcher(QemuLauncher::with_firmware(Box::new(StaticFirmware(
                vec![1; 64],
            ))));
        let workdir = WorkDir::create_in(tmp.path()).unwrap();
        let plan = machine.prepare(&workdir).await.unwrap();

        assert!(workdir.join("QEMU_EFI.fd").is_file());
        assert!(plan.args.iter().any(|a| a == "cortex-a72"));
        assert!(!workdir.join("disk.img").exists());
    }

    #[tokio::test]
    async fn test_prepare_missing_firmware_before_assembly() {
        let tmp = TempDir::new().unwrap();
        let search = fake_emulator(tmp.path(), Arch::Arm64, "exit 0");
        let mut config = config(part_files(tmp.path()));
        config.arch = Arch::Arm64;

        let machine = Machine::new(config)
            .with_search_path(search)
            .with_launcher(QemuLauncher::with_firmware(Box::new(StaticFirmware(
                Vec::new(),
            ))));
        let workdir = WorkDir::create_in(tmp.path()).unwrap();
        let err = machine.prepare(&workdir).await.unwrap_err();

        assert!(matches!(err, MachineError::FirmwareNotFound(_)));
        assert!(!workdir.join("disk.img").exists());
    }

    #[tokio::test]
    async fn test_prepare_missing_binary() {
        let tmp = TempDir::new().unwrap();
        let machine = Machine::new(config(part_files(tmp.path())))
            .with_search_path(tmp.path().join("nothing").into_os_string());

        let workdir = WorkDir::create_in(tmp.path()).unwrap();
        let err = machine.prepare(&workdir).await.unwrap_err();
        assert!(matches!(err, MachineError::BinaryNotFound { .. }));
        assert!(!workdir.join("disk.img").exists());
    }

    #[tokio::test]
    async fn test_run_to_exit_removes_workdir() {
        let tmp = TempDir::new().unwrap();
        let search = fake_emulator(tmp.path(), Arch::Amd64, "exit 7");
        let parent = tmp.path().join("runs");
        std::fs::create_dir(&parent).unwrap();

        let termination = Machine::new(config(part_files(tmp.path())))
            .with_search_path(search)
            .with_workdir_parent(parent.clone())
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(termination.exit_code(), 7);
        assert!(is_empty_dir(&parent));
    }

    #[tokio::test]
    async fn test_cancel_during_pull_removes_workdir() {
        let tmp = TempDir::new().unwrap();
        let search = fake_emulator(tmp.path(), Arch::Amd64, "exit 0");
        let parent = tmp.path().join("runs");
        std::fs::create_dir(&parent).unwrap();

        let termination = Machine::new(config(SourceSpec {
            artifact: Some("localhost:5000/gokrazy/sample:amd64".to_string()),
            ..Default::default()
        }))
        .with_search_path(search)
        .with_artifact_source(Box::new(StalledArtifacts))
        .with_workdir_parent(parent.clone())
        .run(tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap();

        assert!(matches!(termination, Termination::Cancelled));
        assert_eq!(termination.exit_code(), 0);
        assert!(is_empty_dir(&parent));
    }

    #[tokio::test]
    async fn test_run_error_removes_workdir() {
        let tmp = TempDir::new().unwrap();
        let search = fake_emulator(tmp.path(), Arch::Amd64, "exit 0");
        let parent = tmp.path().join("runs");
        std::fs::create_dir(&parent).unwrap();

        let err = Machine::new(config(SourceSpec::default()))
            .with_search_path(search)
            .with_workdir_parent(parent.clone())
            .run(std::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, MachineError::ConfigError(_)));
        assert!(is_empty_dir(&parent));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(part_files(tmp.path()));
        config.cores = 0;

        let err = Machine::new(config)
            .with_workdir_parent(tmp.path().to_path_buf())
            .run(std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, MachineError::ConfigError(_)));
    }
}
