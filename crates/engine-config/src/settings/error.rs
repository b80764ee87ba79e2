use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating engine settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for the expected shape.
    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),

    /// One or more values are out of range or inconsistent.
    #[error("Settings validation failed:\n  - {}", .0.join("\n  - "))]
    ValidationFailed(Vec<String>),
}
