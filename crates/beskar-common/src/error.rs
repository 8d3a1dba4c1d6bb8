//! Common error types for Beskar components.

use thiserror::Error;

/// Common errors across Beskar components
#[derive(Debug, Error)]
pub enum BeskarError {
    /// Configuration file could not be opened or read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file missing under an explicitly requested directory
    #[error("configuration file not found: {path}")]
    NotFound { path: String },

    /// Unknown version or malformed document
    #[error("Schema error: {0}")]
    Schema(String),

    /// Document parsed but violates a validation rule
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed base64 secret, address, or port
    #[error("Decode error: {0}")]
    Decode(String),

    /// Peer discovery failure (orchestrator API, missing port or peers)
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Certificate authority generation or serialization failure
    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl BeskarError {
    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Discovery(_))
    }
}

/// Result alias for Beskar operations
pub type Result<T> = std::result::Result<T, BeskarError>;
