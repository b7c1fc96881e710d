//! Error types for Mirix

use thiserror::Error;

/// Result type alias for Mirix operations
pub type Result<T> = std::result::Result<T, MirixError>;

/// Main error type for Mirix
///
/// Cache and embedding failures never appear here: both are degraded-mode
/// operation, logged and swallowed at the call site. Only store errors and
/// caller mistakes propagate.
#[derive(Error, Debug)]
pub enum MirixError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Raw memory not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirixError {
    /// True for errors the caller can fix by changing the request
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            MirixError::NotFound(_) | MirixError::InvalidInput(_) | MirixError::AccessDenied(_)
        )
    }
}
