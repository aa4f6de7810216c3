use thiserror::Error;

/// Broad classes of failure, used by callers to decide how to report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid or missing operator input. Raised before any real work starts.
    Configuration,
    /// An input artifact does not have the expected structure.
    Format,
    /// Registry or local network failures.
    Transport,
    /// Building the raw disk image failed.
    Assembly,
    /// The host is missing something the run needs (e.g. the emulator).
    Environment,
    /// Starting or stopping the emulator process failed.
    Supervision,
    /// Any other filesystem failure.
    Io,
}

/// gom error types
#[derive(Error, Debug)]
pub enum MachineError {
    /// Invalid operator input
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Requested guest architecture has no emulator mapping
    #[error("Unsupported architecture: {0}")]
    UnsupportedArch(String),

    /// Feature restricted to a single host platform
    #[error("{feature} is only supported on {supported} (current platform: {current})")]
    UnsupportedPlatform {
        feature: String,
        supported: String,
        current: String,
    },

    /// Remote artifact reference does not follow `registry/repository:tag`
    #[error("Invalid artifact reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Archive is a valid zip but lacks one of the fixed entries
    #[error("unable to extract malformed archive")]
    MalformedArchive,

    /// Archive could not be read at all
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Pulled artifact is inconsistent (e.g. a layer without a title)
    #[error("Artifact error: {0}")]
    ArtifactError(String),

    /// Could not obtain free local ports
    #[error("Port allocation failed: {0}")]
    PortAllocation(String),

    /// Raw disk construction failed
    #[error("Disk assembly failed: {0}")]
    DiskError(String),

    /// A partition image does not fit its region of the disk
    #[error("{partition} partition is {size} bytes but only {limit} bytes are available")]
    PartitionTooLarge {
        partition: String,
        size: u64,
        limit: u64,
    },

    /// Emulator binary missing from the search path
    #[error("Executable not found: {binary}")]
    BinaryNotFound {
        binary: String,
        hint: Option<String>,
    },

    /// No firmware blob available for the guest architecture
    #[error("Firmware not found: {0}")]
    FirmwareNotFound(String),

    /// Emulator failed to spawn
    #[error("Emulator launch failed: {0}")]
    LaunchError(String),

    /// Termination sequence failed
    #[error("Supervision error: {0}")]
    SupervisionError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl MachineError {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MachineError::ConfigError(_)
            | MachineError::UnsupportedArch(_)
            | MachineError::UnsupportedPlatform { .. }
            | MachineError::InvalidReference { .. } => ErrorCategory::Configuration,
            MachineError::MalformedArchive
            | MachineError::ArchiveError(_)
            | MachineError::ArtifactError(_)
            | MachineError::SerializationError(_) => ErrorCategory::Format,
            MachineError::RegistryError { .. } | MachineError::PortAllocation(_) => {
                ErrorCategory::Transport
            }
            MachineError::DiskError(_) | MachineError::PartitionTooLarge { .. } => {
                ErrorCategory::Assembly
            }
            MachineError::BinaryNotFound { .. } | MachineError::FirmwareNotFound(_) => {
                ErrorCategory::Environment
            }
            MachineError::LaunchError(_) | MachineError::SupervisionError(_) => {
                ErrorCategory::Supervision
            }
            MachineError::IoError(_) => ErrorCategory::Io,
        }
    }

    /// Remediation hint, if the error carries one.
    pub fn hint(&self) -> Option<&str> {
        match self {
            MachineError::BinaryNotFound { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MachineError {
    fn from(err: serde_json::Error) -> Self {
        MachineError::SerializationError(err.to_string())
    }
}

/// Result type alias for gom operations
pub type Result<T> = std::result::Result<T, MachineError>;
