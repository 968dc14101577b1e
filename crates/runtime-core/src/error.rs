//! Error and warning types for the training pipeline

use std::fmt;
use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the training pipeline
#[derive(Error, Debug)]
pub enum Error {
    // Component resolution errors
    #[error("Cannot resolve component for section '{section}': {message}")]
    Resolution { section: String, message: String },

    // Checkpoint errors
    #[error("Checkpoint not found: {path}")]
    CheckpointNotFound { path: String },

    #[error("Pretrained weights not found: {path}")]
    PretrainedNotFound { path: String },

    #[error("Checkpoint write failed: {message}")]
    CheckpointWriteFailed { message: String },

    #[error("Checkpoint corrupted: {path} - {reason}")]
    CheckpointCorrupted { path: String, reason: String },

    // Model errors
    #[error("State dict mismatch: missing={missing:?}, unexpected={unexpected:?}")]
    StateDictMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Optimizer state rejected: {message}")]
    OptimizerState { message: String },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns true if the caller may reasonably re-attempt the operation.
    ///
    /// Nothing in the pipeline retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CheckpointWriteFailed { .. } | Error::Storage { .. } | Error::Io(_)
        )
    }

    /// Returns true if this error aborts job setup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Resolution { .. }
                | Error::CheckpointNotFound { .. }
                | Error::PretrainedNotFound { .. }
                | Error::CheckpointCorrupted { .. }
                | Error::StateDictMismatch { .. }
                | Error::InvalidConfig { .. }
                | Error::Internal { .. }
        )
    }

    /// Shorthand for a resolution failure in `section`
    pub fn resolution(section: &str, message: impl Into<String>) -> Self {
        Error::Resolution {
            section: section.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Non-fatal conditions detected during setup.
///
/// Each one is logged once where it is detected and the job continues in a
/// degraded mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupWarning {
    /// Devices were requested but none are available; running on CPU
    NoAccelerator { requested: usize },

    /// Fewer devices available than requested; clamped
    DeviceShortfall { requested: usize, available: usize },

    /// Checkpoint architecture differs from the live config; weights loaded non-strictly
    ArchitectureMismatch { checkpoint: String, live: String },

    /// Checkpoint optimizer type differs; optimizer state not restored
    OptimizerMismatch { checkpoint: String, live: String },

    /// Saved optimizer state does not fit the live parameters; optimizer left fresh
    OptimizerStateIncompatible { reason: String },
}

impl fmt::Display for SetupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupWarning::NoAccelerator { requested } => write!(
                f,
                "{} device(s) requested but none available, training will be performed on CPU",
                requested
            ),
            SetupWarning::DeviceShortfall {
                requested,
                available,
            } => write!(
                f,
                "{} device(s) configured but only {} available",
                requested, available
            ),
            SetupWarning::ArchitectureMismatch { checkpoint, live } => write!(
                f,
                "architecture in config ({}) differs from checkpoint ({}), loading weights non-strictly",
                live, checkpoint
            ),
            SetupWarning::OptimizerMismatch { checkpoint, live } => write!(
                f,
                "optimizer type in config ({}) differs from checkpoint ({}), optimizer state not resumed",
                live, checkpoint
            ),
            SetupWarning::OptimizerStateIncompatible { reason } => write!(
                f,
                "optimizer state in checkpoint does not fit the model ({}), optimizer state not resumed",
                reason
            ),
        }
    }
}
