//! gom Runtime - disk preparation and emulator supervision.
//!
//! The pipeline for one run:
//!
//! ```text
//! SourceResolver ──► DiskAssembler ──► QemuLauncher ──► Supervisor
//!   (archive, oci)     (gpt, copy)      (ports, fw)      (signals, cleanup)
//! ```
//!
//! [`Machine`] drives the whole pipeline.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod disk;
pub mod machine;
pub mod oci;
pub mod ports;
pub mod qemu;
pub mod source;
pub mod supervisor;
pub mod workdir;

// Re-export common types
pub use archive::{extract, extract_file, ArchiveEntry, ArchiveParts, BUNDLE_FILE_NAME};
pub use disk::{DiskAssembler, GptPartitioner, PartitionFiles, PartitionTableWriter};
pub use machine::Machine;
pub use oci::{ArtifactPuller, ArtifactReference, ArtifactSource, RegistryAuth};
pub use ports::free_ports;
pub use qemu::{
    find_binary, EmbeddedFirmware, FirmwareStore, LaunchPlan, NetworkPlan, QemuLauncher,
};
pub use source::{ResolvedSource, SourceMode, SourceResolver};
pub use supervisor::{Supervisor, Termination};
pub use workdir::WorkDir;

/// gom Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
