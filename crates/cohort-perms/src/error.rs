//! Error types for permission evaluation and key distribution.

use thiserror::Error;

/// Errors that can occur during permission and key operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// None of the supplied accounts is on a chain the criteria use.
    #[error("no supplied account is on a supported network")]
    NetworksNotSupported,

    /// The balance provider failed.
    #[error("balance lookup failed: {0}")]
    BalanceUnavailable(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] cohort_core::CoreError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
