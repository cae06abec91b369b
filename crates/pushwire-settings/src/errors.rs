//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when loading, resolving or reading provider settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A settings value was invalid (e.g. a negative delay).
    #[error("invalid settings value for provider '{provider}': {reason}")]
    InvalidValue {
        /// Provider the value belongs to.
        provider: String,
        /// What is wrong with it.
        reason: String,
    },

    /// No provider with this name is configured.
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// A certificate or key file could not be read.
    #[error("failed to read credentials from {}: {source}", path.display())]
    Credentials {
        /// The file that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
