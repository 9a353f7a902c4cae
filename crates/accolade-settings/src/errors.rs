//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON that does not fit the settings schema. `path` is set when the
    /// file itself is malformed.
    #[error("{}: {source}", path.as_ref().map_or_else(|| "settings".to_string(), |p| p.display().to_string()))]
    Json {
        /// Offending file, if any.
        path: Option<PathBuf>,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A value parsed but cannot work at runtime.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// camelCase path of the field, e.g. `client.queueLimit`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(source: serde_json::Error) -> Self {
        Self::Json { path: None, source }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
