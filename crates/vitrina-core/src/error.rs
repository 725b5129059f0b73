//! Error types for vitrina.

use thiserror::Error;

/// Result type alias using vitrina's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vitrina operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Catalog item not found
    #[error("Item not found: {0}")]
    ItemNotFound(uuid::Uuid),

    /// Image bytes could not be decoded
    #[error("Unprocessable image: {0}")]
    Unprocessable(String),

    /// Embedding model failed to initialize or run
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// Stored vector bytes are malformed
    #[error("Corrupt vector: {0}")]
    CorruptVector(String),

    /// Search operation failed
    #[error("Search error: {0}")]
    Search(String),

    /// Background job error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means "no embedding could be produced for the
    /// image", as opposed to an infrastructure failure.
    pub fn is_extraction_failure(&self) -> bool {
        matches!(self, Error::Unprocessable(_) | Error::ModelUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
