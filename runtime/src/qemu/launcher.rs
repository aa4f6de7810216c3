//! Emulator command construction.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use gom_core::config::{Arch, MachineConfig};
use gom_core::error::{MachineError, Result};
use serde::Serialize;

use super::firmware::{self, EmbeddedFirmware, FirmwareStore};
use super::network::NetworkPlan;

/// Privilege elevation wrapper for shared networking.
const SUDO: &str = "sudo";

/// Emulator binary for a guest architecture.
pub fn emulator_binary(arch: Arch) -> &'static str {
    match arch {
        Arch::Amd64 => "qemu-system-x86_64",
        Arch::Arm64 => "qemu-system-aarch64",
    }
}

/// A fully built emulator invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    /// Emulator binary, a bare name or a resolved path
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Run through `sudo`
    pub needs_privileges: bool,
}

impl LaunchPlan {
    /// The program to execute and its arguments, elevation applied.
    pub fn command(&self) -> (OsString, Vec<OsString>) {
        let args = self.args.iter().map(OsString::from);
        if self.needs_privileges {
            let mut wrapped = vec![self.program.clone().into_os_string()];
            wrapped.extend(args);
            (OsString::from(SUDO), wrapped)
        } else {
            (self.program.clone().into_os_string(), args.collect())
        }
    }
}

/// Printable command block: each flag shares a line with its value.
///
/// ```text
/// -----
/// qemu-system-x86_64
/// -name gom-3f9a2c1
/// -nographic -usb -m 1G
/// ...
/// -----
/// ```
impl fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const DELIMITER: &str = "-----";

        let (program, args) = self.command();
        writeln!(f, "{DELIMITER}")?;
        writeln!(f, "{}", program.to_string_lossy())?;

        let mut line: Vec<String> = Vec::new();
        for arg in &args {
            let arg = arg.to_string_lossy();
            line.push(arg.to_string());
            if !arg.starts_with('-') {
                writeln!(f, "{}", line.join(" "))?;
                line.clear();
            }
        }
        if !line.is_empty() {
            writeln!(f, "{}", line.join(" "))?;
        }
        write!(f, "{DELIMITER}")
    }
}

/// Builds [`LaunchPlan`]s from a machine configuration.
pub struct QemuLauncher {
    firmware: Box<dyn FirmwareStore>,
}

impl QemuLauncher {
    pub fn new() -> Self {
        Self::with_firmware(Box::new(EmbeddedFirmware::new()))
    }

    pub fn with_firmware(firmware: Box<dyn FirmwareStore>) -> Self {
        Self { firmware }
    }

    /// Write the firmware `arch` boots with into `workdir`.
    ///
    /// Returns `None` for architectures that use the emulator's built-in
    /// firmware.
    pub fn stage_firmware(&self, arch: Arch, workdir: &Path) -> Result<Option<PathBuf>> {
        match arch {
            Arch::Amd64 => Ok(None),
            Arch::Arm64 => firmware::materialize(self.firmware.as_ref(), workdir).map(Some),
        }
    }

    /// Build the invocation booting `disk`.
    ///
    /// `firmware` comes from [`QemuLauncher::stage_firmware`].
    pub fn plan(
        &self,
        config: &MachineConfig,
        disk: &Path,
        network: &NetworkPlan,
        firmware: Option<&Path>,
    ) -> Result<LaunchPlan> {
        let mut args: Vec<String> = vec![
            "-name".into(),
            config.name.clone(),
            "-nographic".into(),
            "-usb".into(),
            "-m".into(),
            config.memory.as_str().to_string(),
            "-smp".into(),
            format!("cores={}", config.cores),
            "-boot".into(),
            "order=d".into(),
            "-drive".into(),
            format!("file={},format=raw", disk.display()),
        ];

        if config.arch == Arch::Arm64 {
            let bios = firmware.ok_or_else(|| {
                MachineError::FirmwareNotFound("arm64 guests need staged UEFI firmware".to_string())
            })?;
            args.extend([
                "-machine".to_string(),
                "virt,highmem=off".to_string(),
                "-cpu".to_string(),
                "cortex-a72".to_string(),
                "-bios".to_string(),
                bios.display().to_string(),
            ]);
        }

        args.extend(network.args());

        for forward in network.forwards() {
            tracing::info!(
                host = forward.host,
                guest = forward.guest,
                "Forwarding host port to guest"
            );
        }

        Ok(LaunchPlan {
            program: PathBuf::from(emulator_binary(config.arch)),
            args,
            needs_privileges: network.needs_privileges(),
        })
    }
}

impl Default for QemuLauncher {
    fn default() -> Self {
        Self::new()
    }
}

/// Look `name` up on `PATH`.
pub fn find_binary(name: &str) -> Result<PathBuf> {
    find_binary_in(name, std::env::var_os("PATH"))
}

/// Look `name` up in a `PATH`-style directory list.
pub fn find_binary_in(name: &str, search_path: Option<OsString>) -> Result<PathBuf> {
    let found = match search_path {
        Some(dirs) => std::env::split_paths(&dirs)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate)),
        None => None,
    };

    found.ok_or_else(|| MachineError::BinaryNotFound {
        binary: name.to_string(),
        hint: Some(format!(
            "Install QEMU (e.g. `apt install qemu-system` or `brew install qemu`) and make sure {} is on PATH",
            name
        )),
    })
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
