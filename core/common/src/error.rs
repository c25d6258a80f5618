//! Common error types for StudioSync.

use thiserror::Error;

/// Top-level error type for storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Object or directory does not exist.
    ///
    /// Every backend maps its own "not found" signaling onto this variant.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote transport failure (network, auth, quota, malformed response).
    #[error("Network error: {0}")]
    Network(String),

    /// An exclusive operation is already running.
    #[error("Already in progress: {0}")]
    AlreadyInProgress(String),

    /// Interactive flow was cancelled by the user.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend or store configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the addressed object is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
