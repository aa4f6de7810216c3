//! gom Core - Foundational Types
//!
//! Error taxonomy and the immutable run configuration shared by the
//! runtime and the CLI.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{
    Arch, DiskLayout, MachineConfig, MemorySize, NetworkSpec, PortForward, RegistryCredentials,
    SharedNetwork, SourceSpec,
};
pub use error::{ErrorCategory, MachineError, Result};

/// gom version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
