//! Error types for the backup runner.
//!
//! Two families are kept apart on purpose: [`ConfigError`] aborts the run,
//! [`BackupError`] is recorded in the report and the run carries on.

use thiserror::Error;

/// Fatal configuration problems. Nothing else can run safely without a
/// valid configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Error in config file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Invalid setting '{setting}': {message}")]
    Invalid { setting: String, message: String },

    #[error("I/O error while reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(setting: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            setting: setting.into(),
            message: message.into(),
        }
    }
}

/// Failures raised by a concrete storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Storage API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Recoverable failures, isolated to one archive, one file or one backend.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Archive creation failed: {0}")]
    ArchiveCreation(String),

    #[error("Backend '{0}' is unavailable")]
    BackendUnavailable(String),

    #[error("Size mismatch for '{path}': local {source_size} bytes, remote {dest_size} bytes")]
    SizeMismatch {
        path: String,
        source_size: u64,
        dest_size: u64,
    },

    #[error("Deletion of '{path}' did not take effect")]
    DeleteNotApplied { path: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// True for the post-condition failures of a copy or a delete.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            BackupError::SizeMismatch { .. } | BackupError::DeleteNotApplied { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
