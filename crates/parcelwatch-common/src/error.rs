//! Error types for Parcelwatch

use thiserror::Error;

/// Result type alias for Parcelwatch operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for Parcelwatch
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Upload job not found: {0}")]
    JobNotFound(String),

    #[error("Property not found: {0}")]
    PropertyNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
