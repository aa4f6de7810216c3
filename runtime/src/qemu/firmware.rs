//! UEFI firmware for arm64 guests.
//!
//! The blob is compiled into the binary when `GOM_EFI_FIRMWARE` points at a
//! firmware file during the build. Otherwise the firmware shipped by the
//! host's QEMU packages is used.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use gom_core::error::{MachineError, Result};

/// File name of the firmware inside the working directory.
pub const FIRMWARE_FILE_NAME: &str = "QEMU_EFI.fd";

/// Where distributions install aarch64 UEFI firmware.
const SYSTEM_FIRMWARE_PATHS: &[&str] = &[
    "/usr/share/qemu-efi-aarch64/QEMU_EFI.fd",
    "/usr/share/AAVMF/AAVMF_CODE.fd",
    "/opt/homebrew/share/qemu/edk2-aarch64-code.fd",
    "/usr/local/share/qemu/edk2-aarch64-code.fd",
    "/usr/share/qemu/edk2-aarch64-code.fd",
];

#[cfg(gom_embedded_firmware)]
const EMBEDDED: Option<&[u8]> = Some(include_bytes!(env!("GOM_EMBEDDED_FIRMWARE_PATH")));
#[cfg(not(gom_embedded_firmware))]
const EMBEDDED: Option<&[u8]> = None;

/// Source of the firmware blob.
pub trait FirmwareStore: Send + Sync {
    fn load(&self) -> Result<Cow<'static, [u8]>>;
}

/// Build-time embedded firmware with a fallback to system paths.
#[derive(Debug, Clone)]
pub struct EmbeddedFirmware {
    search_paths: Vec<PathBuf>,
}

impl EmbeddedFirmware {
    pub fn new() -> Self {
        Self::with_search_paths(SYSTEM_FIRMWARE_PATHS.iter().map(PathBuf::from).collect())
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Whether a blob was compiled in.
    pub fn is_embedded() -> bool {
        EMBEDDED.is_some()
    }
}

impl Default for EmbeddedFirmware {
    fn default() -> Self {
        Self::new()
    }
}

impl FirmwareStore for EmbeddedFirmware {
    fn load(&self) -> Result<Cow<'static, [u8]>> {
        if let Some(blob) = EMBEDDED {
            return Ok(Cow::Borrowed(blob));
        }

        for path in &self.search_paths {
            if !path.is_file() {
                continue;
            }
            let data = fs::read(path)?;
            if data.is_empty() {
                tracing::warn!(path = %path.display(), "Ignoring empty firmware file");
                continue;
            }
            tracing::debug!(path = %path.display(), bytes = data.len(), "Using system firmware");
            return Ok(Cow::Owned(data));
        }

        Err(MachineError::FirmwareNotFound(format!(
            "no aarch64 UEFI firmware embedded or found in {}; install qemu-efi-aarch64 \
             or rebuild with GOM_EFI_FIRMWARE=/path/to/QEMU_EFI.fd",
            self.search_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

/// Write the firmware from `store` into `dir` and return its path.
pub fn materialize(store: &dyn FirmwareStore, dir: &Path) -> Result<PathBuf> {
    let data = store.load()?;
    if data.is_empty() {
        return Err(MachineError::FirmwareNotFound(
            "firmware blob is empty".to_string(),
        ));
    }

    let path = dir.join(FIRMWARE_FILE_NAME);
    fs::write(&path, &data)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
    }

    tracing::debug!(path = %path.display(), bytes = data.len(), "Materialized firmware");
    Ok(path)
}
