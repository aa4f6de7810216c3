//! QEMU invocation: networking, firmware and the final command line.

pub mod firmware;
pub mod launcher;
pub mod network;

pub use firmware::{EmbeddedFirmware, FirmwareStore, FIRMWARE_FILE_NAME};
pub use launcher::{emulator_binary, find_binary, LaunchPlan, QemuLauncher};
pub use network::{NetworkPlan, SHARED_NETWORK_OS};
