//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why the relay settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON or does not fit the settings shape.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// One setting holds a value the relay cannot run with.
    #[error("invalid setting {key}: {reason}")]
    InvalidValue {
        /// Dotted camelCase path of the setting, e.g. `connection.queueCapacity`.
        key: &'static str,
        /// What is wrong with the value.
        reason: String,
    },
}

impl SettingsError {
    /// Build an [`SettingsError::InvalidValue`] for `key`.
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }

    /// Setting that failed validation, if this is a validation error.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { key, .. } => Some(key),
            Self::Read { .. } | Self::Json(_) => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
