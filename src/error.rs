//! Domain-specific error types for the provisioning engine.
//!
//! Internal modules return typed errors ([`ConfigError`], [`StepError`])
//! while command handlers at the CLI boundary convert them to
//! [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! ConfigError   : fatal, raised before any step runs
//! StepError     : recorded as a failed step in the run report
//! ```
//!
//! Collaborators in [`crate::host`] return [`anyhow::Result`]. A collaborator
//! that needs to signal a typed condition (for example a blocked destructive
//! action) returns a [`StepError`] wrapped in `anyhow`, and
//! [`StepError::from_collaborator`] recovers it at the step boundary.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that arise from configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("IO error reading config file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or contains unknown keys.
    #[error("Invalid TOML in {file}: {message}")]
    Parse {
        /// Name of the configuration source.
        file: String,
        /// Parser message.
        message: String,
    },

    /// A required key is absent.
    #[error("Missing required key '{0}'")]
    MissingKey(String),

    /// A required key is present but empty.
    #[error("Key '{0}' must not be empty")]
    EmptyValue(String),

    /// A key holds a value of the wrong semantic type.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue {
        /// Dotted key name (e.g. `backup.device`).
        key: String,
        /// Human-readable reason.
        reason: String,
    },
}

/// Errors recorded as the reason of a failed step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// The mount point is already served by a different device.
    #[error("{path} is mounted from {mounted}, expected {requested}")]
    MountConflict {
        /// Mount point directory.
        path: PathBuf,
        /// Device currently mounted at `path`.
        mounted: PathBuf,
        /// Device the configuration asks for.
        requested: PathBuf,
    },

    /// fstab already mounts the directory from a different device.
    #[error("{file} already mounts {directory} from {existing}, expected {requested}")]
    FstabConflict {
        /// The fstab file.
        file: PathBuf,
        /// Mount point directory.
        directory: PathBuf,
        /// Device field of the existing entry.
        existing: String,
        /// Device the configuration asks for.
        requested: PathBuf,
    },

    /// Formatting was refused because the device already holds a filesystem.
    #[error("{device} already holds a {existing} filesystem; set filesystem.force to reformat")]
    DestructiveActionBlocked {
        /// Target block device.
        device: PathBuf,
        /// Filesystem type found on the device.
        existing: String,
    },

    /// Some packages of a batch install are still missing afterwards.
    #[error("packages not installed: {}", .failed.join(", "))]
    PartialInstall {
        /// Package names still missing.
        failed: Vec<String>,
    },

    /// An external tool or library call failed.
    #[error("{0}")]
    CollaboratorFailure(String),

    /// The step did not finish within the configured per-step timeout.
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// `apply` reported success but the follow-up check is still unsatisfied.
    #[error("state did not converge after apply: {0}")]
    NotConverged(String),
}

impl StepError {
    /// Recover a typed [`StepError`] from a collaborator error, or wrap the
    /// full error chain as [`StepError::CollaboratorFailure`].
    #[must_use]
    pub fn from_collaborator(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(typed) => typed,
            Err(other) => Self::CollaboratorFailure(format!("{other:#}")),
        }
    }

    /// Whether this failure must halt the run even under continue-on-error.
    #[must_use]
    pub const fn always_halts(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_collaborator(err)
    }
}
