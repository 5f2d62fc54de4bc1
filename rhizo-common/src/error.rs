//! Common error types for rhizo

use thiserror::Error;

/// Common result type for rhizo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the rhizo tools
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or field schema validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or inconsistent input data
    #[error("Data error: {0}")]
    Data(String),

    /// Requested record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Report could not be produced or saved
    #[error("Serialization error: {0}")]
    Serialization(String),
}
