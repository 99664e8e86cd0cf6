//! Store traits: the abstract interface for server-side persistence.
//!
//! The realm role authority and the other backend components only see these
//! traits. Implementations include SQLite and in-memory (reference, tests).

use async_trait::async_trait;

use coffer_core::{
    BlockId, DeviceId, EntryId, RealmId, RealmStatus, RoleGrant, Timestamp, UserId, UserProfile,
    VerifyKey,
};

use crate::error::Result;

/// One version of a vlob, stored under one encryption revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlobAtom {
    pub realm_id: RealmId,
    pub entry_id: EntryId,
    pub encryption_revision: u64,
    pub version: u64,
    pub blob: Vec<u8>,
    pub author: DeviceId,
    pub timestamp: Timestamp,
}

/// Item of a reencryption batch: one vlob version's blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReencryptionItem {
    pub entry_id: EntryId,
    pub version: u64,
    pub blob: Vec<u8>,
}

/// An immutable encrypted block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub block_id: BlockId,
    pub realm_id: RealmId,
    pub author: DeviceId,
    pub created_on: Timestamp,
    pub data: Vec<u8>,
}

/// Storage footprint of a realm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealmStats {
    pub blocks_size: u64,
    pub vlobs_size: u64,
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub user_id: UserId,
    pub profile: UserProfile,
    pub public_key: [u8; 32],
    pub user_certificate: Vec<u8>,
    pub user_certifier: Option<DeviceId>,
    pub created_on: Timestamp,
    pub revoked_on: Option<Timestamp>,
    pub revoked_user_certificate: Option<Vec<u8>>,
    pub revoked_user_certifier: Option<DeviceId>,
}

impl UserEntry {
    /// Whether the user was revoked at or before `at`.
    pub fn is_revoked_at(&self, at: Timestamp) -> bool {
        self.revoked_on.map_or(false, |revoked_on| revoked_on <= at)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_on.is_some()
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub device_id: DeviceId,
    pub verify_key: VerifyKey,
    pub device_certificate: Vec<u8>,
    pub device_certifier: Option<DeviceId>,
    pub created_on: Timestamp,
}

/// A message waiting in a user's inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub sender: DeviceId,
    pub timestamp: Timestamp,
    pub body: Vec<u8>,
}

/// Realm, role, vlob and block persistence.
///
/// Callers serialize read-modify-write sequences per realm; each method is
/// atomic on its own.
#[async_trait]
pub trait RealmStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Realm Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a realm with its initial status, revision 1 bucket and root grant.
    ///
    /// Fails with `AlreadyExists` if the realm exists.
    async fn create_realm(&self, realm_id: &RealmId, root_grant: &RoleGrant) -> Result<()>;

    async fn get_realm_status(&self, realm_id: &RealmId) -> Result<Option<RealmStatus>>;

    async fn set_realm_status(&self, realm_id: &RealmId, status: &RealmStatus) -> Result<()>;

    /// Set the status and open the bucket of `status.encryption_revision`,
    /// in one transaction.
    async fn start_reencryption(&self, realm_id: &RealmId, status: &RealmStatus) -> Result<()>;

    /// Realms where `user_id` has ever been granted a role.
    async fn get_realm_ids_for_user(&self, user_id: &UserId) -> Result<Vec<RealmId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Role Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Append to the realm's role log. Grants are never mutated or removed.
    async fn append_role_grant(&self, grant: &RoleGrant) -> Result<()>;

    /// The role log, ordered by `granted_on` then insertion, optionally
    /// restricted to grants issued strictly after `since`.
    async fn get_role_grants(
        &self,
        realm_id: &RealmId,
        since: Option<Timestamp>,
    ) -> Result<Vec<RoleGrant>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Vlob Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Open the bucket receiving vlobs of `revision`.
    async fn create_vlob_revision_bucket(&self, realm_id: &RealmId, revision: u64) -> Result<()>;

    /// Number of vlob atoms stored under `revision`, `None` if the bucket
    /// does not exist.
    async fn count_items_at_revision(
        &self,
        realm_id: &RealmId,
        revision: u64,
    ) -> Result<Option<u64>>;

    /// Realm owning `entry_id`, if the entry exists.
    async fn get_vlob_realm(&self, entry_id: &EntryId) -> Result<Option<RealmId>>;

    /// Insert an atom. Fails with `AlreadyExists` if that version exists
    /// under that revision.
    async fn insert_vlob_atom(&self, atom: &VlobAtom) -> Result<()>;

    /// Read an atom under `revision`: the given version, or the latest one
    /// whose timestamp is not after `timestamp`, or the latest one.
    async fn read_vlob_atom(
        &self,
        entry_id: &EntryId,
        revision: u64,
        version: Option<u64>,
        timestamp: Option<Timestamp>,
    ) -> Result<Option<VlobAtom>>;

    /// All atoms of an entry under `revision`, by ascending version.
    async fn list_vlob_atoms(&self, entry_id: &EntryId, revision: u64) -> Result<Vec<VlobAtom>>;

    /// Up to `size` atoms of `revision - 1` with no counterpart in `revision`.
    async fn get_reencryption_batch(
        &self,
        realm_id: &RealmId,
        revision: u64,
        size: usize,
    ) -> Result<Vec<ReencryptionItem>>;

    /// Store re-encrypted blobs under `revision`, keeping each original
    /// atom's author and timestamp. Items already saved or unknown are
    /// skipped. Returns `(total, done)` item counts.
    async fn save_reencryption_batch(
        &self,
        realm_id: &RealmId,
        revision: u64,
        batch: &[ReencryptionItem],
    ) -> Result<(u64, u64)>;

    // ─────────────────────────────────────────────────────────────────────────
    // Block Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Fails with `AlreadyExists` if the block exists.
    async fn create_block(&self, block: &StoredBlock) -> Result<()>;

    async fn read_block(&self, block_id: &BlockId) -> Result<Option<StoredBlock>>;

    async fn get_realm_stats(&self, realm_id: &RealmId) -> Result<RealmStats>;
}

/// User, device and message inbox persistence.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Fails with `AlreadyExists` if the user or device exists.
    async fn create_user(&self, user: &UserEntry, first_device: &DeviceEntry) -> Result<()>;

    /// Fails with `NotFound` if the user is unknown, `AlreadyExists` if the
    /// device exists.
    async fn create_device(&self, device: &DeviceEntry) -> Result<()>;

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserEntry>>;

    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<DeviceEntry>>;

    async fn get_user_devices(&self, user_id: &UserId) -> Result<Vec<DeviceEntry>>;

    /// All users, ordered by user id.
    async fn list_users(&self) -> Result<Vec<UserEntry>>;

    /// Record a revocation. Fails with `NotFound` if the user is unknown.
    async fn revoke_user(
        &self,
        user_id: &UserId,
        revoked_user_certificate: &[u8],
        revoked_user_certifier: &DeviceId,
        revoked_on: Timestamp,
    ) -> Result<()>;

    /// Append to a user's inbox.
    async fn push_message(&self, recipient: &UserId, message: &StoredMessage) -> Result<()>;

    /// Inbox messages from index `offset` onwards.
    async fn get_messages(&self, recipient: &UserId, offset: usize) -> Result<Vec<StoredMessage>>;
}
