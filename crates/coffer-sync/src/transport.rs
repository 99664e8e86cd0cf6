//! Backend command abstraction.
//!
//! The client talks to the backend through [`BackendCmds`], already
//! authenticated as one device. Implementations may go over the network or,
//! as in tests, call an in-process backend directly.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use coffer_core::{BlockId, DeviceId, EntryId, RealmId, Timestamp, UserId};

use crate::messages::{
    MessageRep, RealmStatsRep, RealmStatusRep, ReencryptionBatchEntry, ReencryptionProgress,
    Rejection, Status, UserGetRep, VlobReadRep, VlobVersions,
};

/// Failure of a backend command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CmdError {
    /// The backend could not be reached. Retryable.
    #[error("backend not available: {0}")]
    NotAvailable(String),

    /// The backend answered with a non-ok status.
    #[error("backend rejected the command: {0}")]
    Rejected(Rejection),
}

impl CmdError {
    pub fn rejected(status: Status, reason: impl Into<String>) -> Self {
        Self::Rejected(Rejection::new(status, reason))
    }

    /// Status of a rejection, `None` if the backend was not reached.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::NotAvailable(_) => None,
            Self::Rejected(rejection) => Some(rejection.status),
        }
    }
}

/// Result type for backend commands.
pub type CmdResult<T> = std::result::Result<T, CmdError>;

/// Commands available to an authenticated device.
#[async_trait]
pub trait BackendCmds: Send + Sync {
    /// Device the commands are authenticated as.
    fn device_id(&self) -> &DeviceId;

    // ─────────────────────────────────────────────────────────────────────────
    // Realm
    // ─────────────────────────────────────────────────────────────────────────

    async fn realm_create(&self, role_certificate: &[u8]) -> CmdResult<()>;

    async fn realm_status(&self, realm_id: &RealmId) -> CmdResult<RealmStatusRep>;

    async fn realm_stats(&self, realm_id: &RealmId) -> CmdResult<RealmStatsRep>;

    async fn realm_get_role_certificates(
        &self,
        realm_id: &RealmId,
        since: Option<Timestamp>,
    ) -> CmdResult<Vec<Vec<u8>>>;

    async fn realm_update_roles(
        &self,
        role_certificate: &[u8],
        recipient_message: Option<Vec<u8>>,
    ) -> CmdResult<()>;

    async fn realm_start_reencryption_maintenance(
        &self,
        realm_id: &RealmId,
        encryption_revision: u64,
        timestamp: Timestamp,
        per_participant_message: HashMap<UserId, Vec<u8>>,
    ) -> CmdResult<()>;

    async fn realm_finish_reencryption_maintenance(
        &self,
        realm_id: &RealmId,
        encryption_revision: u64,
    ) -> CmdResult<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Vlob
    // ─────────────────────────────────────────────────────────────────────────

    async fn vlob_create(
        &self,
        realm_id: &RealmId,
        encryption_revision: u64,
        entry_id: &EntryId,
        timestamp: Timestamp,
        blob: Vec<u8>,
    ) -> CmdResult<()>;

    async fn vlob_update(
        &self,
        encryption_revision: u64,
        entry_id: &EntryId,
        version: u64,
        timestamp: Timestamp,
        blob: Vec<u8>,
    ) -> CmdResult<()>;

    async fn vlob_read(
        &self,
        encryption_revision: u64,
        entry_id: &EntryId,
        version: Option<u64>,
        timestamp: Option<Timestamp>,
    ) -> CmdResult<VlobReadRep>;

    async fn vlob_list_versions(&self, entry_id: &EntryId) -> CmdResult<VlobVersions>;

    async fn vlob_maintenance_get_reencryption_batch(
        &self,
        realm_id: &RealmId,
        encryption_revision: u64,
        size: usize,
    ) -> CmdResult<Vec<ReencryptionBatchEntry>>;

    async fn vlob_maintenance_save_reencryption_batch(
        &self,
        realm_id: &RealmId,
        encryption_revision: u64,
        batch: Vec<ReencryptionBatchEntry>,
    ) -> CmdResult<ReencryptionProgress>;

    // ─────────────────────────────────────────────────────────────────────────
    // Block
    // ─────────────────────────────────────────────────────────────────────────

    async fn block_create(
        &self,
        block_id: &BlockId,
        realm_id: &RealmId,
        block: Vec<u8>,
    ) -> CmdResult<()>;

    async fn block_read(&self, block_id: &BlockId) -> CmdResult<Vec<u8>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Directory and messages
    // ─────────────────────────────────────────────────────────────────────────

    async fn user_get(&self, user_id: &UserId) -> CmdResult<UserGetRep>;

    async fn device_get(&self, device_id: &DeviceId) -> CmdResult<Vec<u8>>;

    /// Messages of the authenticated user's inbox from index `offset`.
    async fn message_get(&self, offset: usize) -> CmdResult<Vec<MessageRep>>;
}
