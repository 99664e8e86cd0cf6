//! Error types for the coffer core primitives.

use thiserror::Error;

/// Core errors raised while decoding, signing or verifying data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid verify key")]
    InvalidVerifyKey,

    #[error("unexpected certificate author: expected {expected}, got {got}")]
    UnexpectedAuthor { expected: String, got: String },

    #[error("unexpected certificate kind: expected {expected}, got {got}")]
    UnexpectedKind { expected: u64, got: u64 },

    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

/// Semantic errors on otherwise well-formed certificates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("realm root certificate must grant OWNER")]
    RootMustBeOwner,

    #[error("realm root certificate must be self-signed")]
    RootMustBeSelfSigned,

    #[error("certificate has no author")]
    MissingAuthor,

    #[error("a user cannot change its own role")]
    CannotUpdateOwnRole,

    #[error("certificate timestamp {got} is out of the ballpark of {now}")]
    TimestampOutOfBallpark { now: i64, got: i64 },
}

pub type Result<T> = std::result::Result<T, CoreError>;
