//! Error types for the client side.

use thiserror::Error;

use coffer_core::{BlockId, DeviceId, EntryId, UserId};
use coffer_perms::TrustchainError;

use crate::messages::Rejection;
use crate::transport::CmdError;

/// Errors raised by the remote loader and its helpers.
#[derive(Debug, Error)]
pub enum FsError {
    /// The backend could not be reached; retry later.
    #[error("backend is offline: {0}")]
    BackendOffline(String),

    #[error("remote manifest `{0}` not found")]
    RemoteManifestNotFound(EntryId),

    #[error("remote manifest `{0}` has no such version")]
    RemoteManifestNotFoundBadVersion(EntryId),

    #[error("remote manifest `{0}` did not exist at that time")]
    RemoteManifestNotFoundBadTimestamp(EntryId),

    #[error("remote block `{0}` not found")]
    RemoteBlockNotFound(BlockId),

    /// A concurrent writer got there first: re-fetch and retry.
    #[error("remote manifest `{0}` changed concurrently")]
    RemoteSyncError(EntryId),

    #[error("workspace is in maintenance: {0}")]
    InMaintenance(String),

    #[error("bad encryption revision: {0}")]
    BadEncryptionRevision(String),

    #[error("no read access: {0}")]
    NoReadAccess(String),

    #[error("no write access: {0}")]
    NoWriteAccess(String),

    #[error("user `{0}` not found")]
    UserNotFound(UserId),

    #[error("device `{0}` not found")]
    DeviceNotFound(DeviceId),

    #[error("invalid trustchain: {0}")]
    InvalidTrustchain(String),

    /// Data failed to decrypt, verify or match what was requested.
    #[error("invalid remote data: {0}")]
    InvalidData(String),

    /// Writes are refused through a historical view.
    #[error("read only: {0}")]
    ReadOnly(String),

    #[error("local storage error: {0}")]
    LocalStorage(String),

    #[error("{0}")]
    Other(String),
}

impl FsError {
    /// Whether retrying later, without any state change, may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendOffline(_))
    }
}

impl From<TrustchainError> for FsError {
    fn from(e: TrustchainError) -> Self {
        match e {
            TrustchainError::UserNotFound(user_id) => FsError::UserNotFound(user_id),
            TrustchainError::DeviceNotFound(device_id) => FsError::DeviceNotFound(device_id),
            TrustchainError::InvalidTrustchain(msg) => FsError::InvalidTrustchain(msg),
            TrustchainError::BackendOffline(msg) => FsError::BackendOffline(msg),
        }
    }
}

/// Lift a command error, leaving rejections to the caller's `on_rejection`.
pub(crate) fn translate_cmd_error(
    e: CmdError,
    on_rejection: impl FnOnce(Rejection) -> FsError,
) -> FsError {
    match e {
        CmdError::NotAvailable(msg) => FsError::BackendOffline(msg),
        CmdError::Rejected(rejection) => on_rejection(rejection),
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, FsError>;
