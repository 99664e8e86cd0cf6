//! Error types for the permissions module.

use thiserror::Error;

use coffer_core::{DeviceId, UserId};

/// Errors raised while encrypting, decrypting or verifying data.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Decrypted manifest does not carry what the caller expected.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] coffer_core::CoreError),
}

/// Errors raised while resolving a trustchain.
#[derive(Debug, Error)]
pub enum TrustchainError {
    #[error("user `{0}` not found")]
    UserNotFound(UserId),

    #[error("device `{0}` not found")]
    DeviceNotFound(DeviceId),

    #[error("invalid trustchain: {0}")]
    InvalidTrustchain(String),

    #[error("backend is offline: {0}")]
    BackendOffline(String),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
