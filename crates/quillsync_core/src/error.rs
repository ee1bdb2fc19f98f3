use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for quillsync operations
#[derive(Debug, Error)]
pub enum QuillsyncError {
    // Store errors
    #[error("Realtime store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid store path '{0}'")]
    InvalidPath(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Config errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Scenario scripts
    #[error("Invalid scenario script: {0}")]
    Script(String),
}

impl QuillsyncError {
    /// Whether this error came from the realtime store being unreachable.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, QuillsyncError::StoreUnavailable(_))
    }
}

/// Result type alias for quillsync operations
pub type Result<T> = std::result::Result<T, QuillsyncError>;
