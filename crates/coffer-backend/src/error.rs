//! Error types for the backend components.
//!
//! Each component has its own error enum. [`status`](RealmError::status)
//! gives the stable machine-readable code answered at the RPC boundary.

use thiserror::Error;

use coffer_core::{BlockId, DeviceId, EntryId, RealmId, Timestamp, UserId};
use coffer_perms::TrustchainError;
use coffer_store::StoreError;
use coffer_sync::Status;

/// Errors of the realm role authority and the maintenance state machine.
#[derive(Debug, Error)]
pub enum RealmError {
    #[error("realm `{0}` not found")]
    RealmNotFound(RealmId),

    #[error("realm `{0}` already exists")]
    AlreadyExists(RealmId),

    #[error("user `{0}` not found")]
    UserNotFound(UserId),

    #[error("access error: {0}")]
    AccessError(String),

    #[error("incompatible profile: {0}")]
    IncompatibleProfile(String),

    #[error("role already granted")]
    RoleAlreadyGranted,

    #[error("role grant must be dated after {0}")]
    RequireGreaterTimestamp(Timestamp),

    #[error("realm `{0}` is in maintenance")]
    InMaintenance(RealmId),

    #[error("realm `{0}` is not in maintenance")]
    NotInMaintenance(RealmId),

    #[error("encryption revision error: {0}")]
    EncryptionRevisionError(String),

    #[error("participants mismatch: {0}")]
    ParticipantsMismatch(String),

    #[error("maintenance error: {0}")]
    MaintenanceError(String),

    #[error("invalid certification: {0}")]
    InvalidCertification(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl RealmError {
    pub fn status(&self) -> Status {
        match self {
            Self::RealmNotFound(_) | Self::UserNotFound(_) => Status::NotFound,
            Self::AlreadyExists(_) => Status::AlreadyExists,
            Self::AccessError(_) => Status::NotAllowed,
            Self::IncompatibleProfile(_) => Status::IncompatibleProfile,
            Self::RoleAlreadyGranted => Status::RoleAlreadyGranted,
            Self::RequireGreaterTimestamp(_) => Status::BadTimestamp,
            Self::InMaintenance(_) => Status::InMaintenance,
            Self::NotInMaintenance(_) => Status::NotInMaintenance,
            Self::EncryptionRevisionError(_) => Status::BadEncryptionRevision,
            Self::ParticipantsMismatch(_) => Status::ParticipantsMismatch,
            Self::MaintenanceError(_) => Status::MaintenanceError,
            Self::InvalidCertification(_) => Status::InvalidCertification,
            Self::Store(_) => Status::InvalidData,
        }
    }
}

/// Errors of the user and device directory.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("user `{0}` not found")]
    UserNotFound(UserId),

    #[error("device `{0}` not found")]
    DeviceNotFound(DeviceId),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("user `{0}` already revoked")]
    UserAlreadyRevoked(UserId),

    #[error("trustchain error: {0}")]
    Trustchain(#[from] TrustchainError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl UserError {
    pub fn status(&self) -> Status {
        match self {
            Self::UserNotFound(_) | Self::DeviceNotFound(_) => Status::NotFound,
            Self::AlreadyExists(_) | Self::UserAlreadyRevoked(_) => Status::AlreadyExists,
            Self::Trustchain(TrustchainError::UserNotFound(_))
            | Self::Trustchain(TrustchainError::DeviceNotFound(_)) => Status::NotFound,
            Self::Trustchain(_) | Self::Store(_) => Status::InvalidData,
        }
    }
}

/// Errors of the vlob component.
#[derive(Debug, Error)]
pub enum VlobError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("vlob `{0}` already exists")]
    AlreadyExists(EntryId),

    #[error("realm `{0}` is in maintenance")]
    InMaintenance(RealmId),

    #[error("realm `{0}` is not in maintenance")]
    NotInMaintenance(RealmId),

    #[error("bad encryption revision: {0}")]
    BadEncryptionRevision(String),

    #[error("bad version: {0}")]
    BadVersion(String),

    #[error("bad timestamp: {0}")]
    BadTimestamp(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl VlobError {
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound(_) => Status::NotFound,
            Self::NotAllowed(_) => Status::NotAllowed,
            Self::AlreadyExists(_) => Status::AlreadyExists,
            Self::InMaintenance(_) => Status::InMaintenance,
            Self::NotInMaintenance(_) => Status::NotInMaintenance,
            Self::BadEncryptionRevision(_) => Status::BadEncryptionRevision,
            Self::BadVersion(_) => Status::BadVersion,
            Self::BadTimestamp(_) => Status::BadTimestamp,
            Self::Store(_) => Status::InvalidData,
        }
    }
}

/// Errors of the block component.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("block `{0}` already exists")]
    AlreadyExists(BlockId),

    #[error("realm `{0}` is in maintenance")]
    InMaintenance(RealmId),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl BlockError {
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound(_) => Status::NotFound,
            Self::NotAllowed(_) => Status::NotAllowed,
            Self::AlreadyExists(_) => Status::AlreadyExists,
            Self::InMaintenance(_) => Status::InMaintenance,
            Self::Store(_) => Status::InvalidData,
        }
    }
}

/// Errors of the message component.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("unknown recipient `{0}`")]
    UnknownRecipient(UserId),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl MessageError {
    pub fn status(&self) -> Status {
        match self {
            Self::UnknownRecipient(_) => Status::NotFound,
            Self::Store(_) => Status::InvalidData,
        }
    }
}

impl From<MessageError> for RealmError {
    fn from(e: MessageError) -> Self {
        match e {
            MessageError::UnknownRecipient(user_id) => RealmError::UserNotFound(user_id),
            MessageError::Store(e) => RealmError::Store(e),
        }
    }
}

/// Errors raised while setting up a backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("user `{0}` is revoked")]
    RevokedUser(UserId),

    #[error("directory error: {0}")]
    User(#[from] UserError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for backend setup.
pub type Result<T> = std::result::Result<T, BackendError>;
