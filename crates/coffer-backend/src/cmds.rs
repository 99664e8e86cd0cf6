//! In-process implementation of the backend commands for one device.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use coffer_core::{
    validate_realm_root_certificate, validate_role_update_certificate, validate_timestamp,
    BlockId, Certificate, DeviceId, EntryId, RealmId, RealmRoleCertificate, RoleGrant, Timestamp,
    UserId,
};
use coffer_store::ReencryptionItem;
use coffer_sync::{
    BackendCmds, CmdError, CmdResult, MessageRep, RealmStatsRep, RealmStatusRep,
    ReencryptionBatchEntry, ReencryptionProgress, Status, UserGetRep, VlobReadRep, VlobVersions,
};

use crate::backend::Backend;
use crate::error::{BackendError, BlockError, MessageError, RealmError, Result, UserError, VlobError};

/// An error answered to the client as a rejection.
trait Rejectable: fmt::Display {
    fn status(&self) -> Status;
}

macro_rules! impl_rejectable {
    ($($error:ty),*) => {
        $(impl Rejectable for $error {
            fn status(&self) -> Status {
                <$error>::status(self)
            }
        })*
    };
}

impl_rejectable!(RealmError, UserError, VlobError, BlockError, MessageError);

struct Rejected(Status, String);

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.1)
    }
}

impl Rejectable for Rejected {
    fn status(&self) -> Status {
        self.0
    }
}

/// Backend commands authenticated as one registered device.
pub struct AuthenticatedCmds {
    backend: Arc<Backend>,
    device_id: DeviceId,
}

impl AuthenticatedCmds {
    pub(crate) async fn connect(backend: Arc<Backend>, device_id: &DeviceId) -> Result<Self> {
        let (user, _) = backend.user().get_user_with_device(device_id).await?;
        if user.is_revoked() {
            return Err(BackendError::RevokedUser(user.user_id));
        }
        debug!(device_id = %device_id, "device connected");
        Ok(Self {
            backend,
            device_id: device_id.clone(),
        })
    }

    fn reject(&self, cmd: &'static str, e: impl Rejectable) -> CmdError {
        let status = e.status();
        if self.backend.config().debug {
            debug!(cmd, device_id = %self.device_id, %status, reason = %e, "command rejected");
        }
        CmdError::rejected(status, e.to_string())
    }

    /// Fail once the authenticated user is revoked.
    async fn check_alive(&self, cmd: &'static str) -> CmdResult<()> {
        let user = self
            .backend
            .user()
            .get_user(self.device_id.user_id())
            .await
            .map_err(|e| self.reject(cmd, e))?;
        if user.is_revoked() {
            return Err(self.reject(
                cmd,
                Rejected(Status::NotAllowed, format!("user `{}` is revoked", user.user_id)),
            ));
        }
        Ok(())
    }

    fn check_timestamp(&self, cmd: &'static str, timestamp: Timestamp) -> CmdResult<()> {
        validate_timestamp(
            Timestamp::now(),
            timestamp,
            self.backend.config().timestamp_ballpark_ms,
        )
        .map_err(|e| self.reject(cmd, Rejected(Status::BadTimestamp, e.to_string())))
    }

    /// Load a role certificate signed by the authenticated device.
    async fn load_role_certificate(
        &self,
        cmd: &'static str,
        signed: &[u8],
    ) -> CmdResult<RealmRoleCertificate> {
        let device = self
            .backend
            .user()
            .get_device(&self.device_id)
            .await
            .map_err(|e| self.reject(cmd, e))?;
        let certif =
            RealmRoleCertificate::verify_and_load(signed, &device.verify_key, Some(&self.device_id))
                .map_err(|e| {
                    warn!(device_id = %self.device_id, error = %e, "invalid role certificate");
                    self.reject(
                        cmd,
                        Rejected(Status::InvalidCertification, format!("invalid certification: {}", e)),
                    )
                })?;
        self.check_timestamp(cmd, certif.timestamp)?;
        Ok(certif)
    }

    fn invalid_certification(&self, cmd: &'static str, e: impl fmt::Display) -> CmdError {
        self.reject(
            cmd,
            Rejected(Status::InvalidCertification, format!("invalid certification: {}", e)),
        )
    }
}

#[async_trait]
impl BackendCmds for AuthenticatedCmds {
    fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Realm
    // ─────────────────────────────────────────────────────────────────────────

    async fn realm_create(&self, role_certificate: &[u8]) -> CmdResult<()> {
        const CMD: &str = "realm_create";
        self.check_alive(CMD).await?;
        let certif = self.load_role_certificate(CMD, role_certificate).await?;
        validate_realm_root_certificate(&certif).map_err(|e| self.invalid_certification(CMD, e))?;
        let grant = RoleGrant::from_certificate(&certif, role_certificate.to_vec());
        self.backend
            .realm()
            .create(grant)
            .await
            .map_err(|e| self.reject(CMD, e))
    }

    async fn realm_status(&self, realm_id: &RealmId) -> CmdResult<RealmStatusRep> {
        const CMD: &str = "realm_status";
        self.check_alive(CMD).await?;
        self.backend
            .realm()
            .get_status(&self.device_id, realm_id)
            .await
            .map_err(|e| self.reject(CMD, e))
    }

    async fn realm_stats(&self, realm_id: &RealmId) -> CmdResult<RealmStatsRep> {
        const CMD: &str = "realm_stats";
        self.check_alive(CMD).await?;
        let stats = self
            .backend
            .realm()
            .get_stats(&self.device_id, realm_id)
            .await
            .map_err(|e| self.reject(CMD, e))?;
        Ok(RealmStatsRep {
            blocks_size: stats.blocks_size,
            vlobs_size: stats.vlobs_size,
        })
    }

    async fn realm_get_role_certificates(
        &self,
        realm_id: &RealmId,
        since: Option<Timestamp>,
    ) -> CmdResult<Vec<Vec<u8>>> {
        const CMD: &str = "realm_get_role_certificates";
        self.check_alive(CMD).await?;
        self.backend
            .realm()
            .get_role_certificates(&self.device_id, realm_id, since)
            .await
            .map_err(|e| self.reject(CMD, e))
    }

    async fn realm_update_roles(
        &self,
        role_certificate: &[u8],
        recipient_message: Option<Vec<u8>>,
    ) -> CmdResult<()> {
        const CMD: &str = "realm_update_roles";
        self.check_alive(CMD).await?;
        let certif = self.load_role_certificate(CMD, role_certificate).await?;
        validate_role_update_certificate(&certif)
            .map_err(|e| self.invalid_certification(CMD, e))?;
        let grant = RoleGrant::from_certificate(&certif, role_certificate.to_vec());
        self.backend
            .realm()
            .update_roles(grant, recipient_message)
            .await
            .map_err(|e| self.reject(CMD, e))
    }

    async fn realm_start_reencryption_maintenance(
        &self,
        realm_id: &RealmId,
        encryption_revision: u64,
        timestamp: Timestamp,
        per_participant_message: HashMap<UserId, Vec<u8>>,
    ) -> CmdResult<()> {
        const CMD: &str = "realm_start_reencryption_maintenance";
        self.check_alive(CMD).await?;
        self.check_timestamp(CMD, timestamp)?;
        self.backend
            .realm()
            .start_reencryption_maintenance(
                &self.device_id,
                realm_id,
                encryption_revision,
                per_participant_message,
                timestamp,
            )
            .await
            .map_err(|e| self.reject(CMD, e))
    }

    async fn realm_finish_reencryption_maintenance(
        &self,
        realm_id: &RealmId,
        encryption_revision: u64,
    ) -> CmdResult<()> {
        const CMD: &str = "realm_finish_reencryption_maintenance";
        self.check_alive(CMD).await?;
        self.backend
            .realm()
            .finish_reencryption_maintenance(&self.device_id, realm_id, encryption_revision)
            .await
            .map_err(|e| self.reject(CMD, e))
    }

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
    ) -> CmdResult<()> {
        const CMD: &str = "vlob_create";
        self.check_alive(CMD).await?;
        self.check_timestamp(CMD, timestamp)?;
        self.backend
            .vlob()
            .create(&self.device_id, realm_id, encryption_revision, entry_id, timestamp, blob)
            .await
            .map_err(|e| self.reject(CMD, e))
    }

    async fn vlob_update(
        &self,
        encryption_revision: u64,
        entry_id: &EntryId,
        version: u64,
        timestamp: Timestamp,
        blob: Vec<u8>,
    ) -> CmdResult<()> {
        const CMD: &str = "vlob_update";
        self.check_alive(CMD).await?;
        self.check_timestamp(CMD, timestamp)?;
        self.backend
            .vlob()
            .update(&self.device_id, encryption_revision, entry_id, version, timestamp, blob)
            .await
            .map_err(|e| self.reject(CMD, e))
    }

    async fn vlob_read(
        &self,
        encryption_revision: u64,
        entry_id: &EntryId,
        version: Option<u64>,
        timestamp: Option<Timestamp>,
    ) -> CmdResult<VlobReadRep> {
        const CMD: &str = "vlob_read";
        self.check_alive(CMD).await?;
        let atom = self
            .backend
            .vlob()
            .read(&self.device_id, encryption_revision, entry_id, version, timestamp)
            .await
            .map_err(|e| self.reject(CMD, e))?;
        Ok(VlobReadRep {
            version: atom.version,
            blob: atom.blob,
            author: atom.author,
            timestamp: atom.timestamp,
        })
    }

    async fn vlob_list_versions(&self, entry_id: &EntryId) -> CmdResult<VlobVersions> {
        const CMD: &str = "vlob_list_versions";
        self.check_alive(CMD).await?;
        let atoms = self
            .backend
            .vlob()
            .list_versions(&self.device_id, entry_id)
            .await
            .map_err(|e| self.reject(CMD, e))?;
        Ok(atoms
            .into_iter()
            .map(|atom| (atom.version, (atom.timestamp, atom.author)))
            .collect())
    }

    async fn vlob_maintenance_get_reencryption_batch(
        &self,
        realm_id: &RealmId,
        encryption_revision: u64,
        size: usize,
    ) -> CmdResult<Vec<ReencryptionBatchEntry>> {
        const CMD: &str = "vlob_maintenance_get_reencryption_batch";
        self.check_alive(CMD).await?;
        let items = self
            .backend
            .vlob()
            .maintenance_get_reencryption_batch(&self.device_id, realm_id, encryption_revision, size)
            .await
            .map_err(|e| self.reject(CMD, e))?;
        Ok(items
            .into_iter()
            .map(|item| ReencryptionBatchEntry {
                entry_id: item.entry_id,
                version: item.version,
                blob: item.blob,
            })
            .collect())
    }

    async fn vlob_maintenance_save_reencryption_batch(
        &self,
        realm_id: &RealmId,
        encryption_revision: u64,
        batch: Vec<ReencryptionBatchEntry>,
    ) -> CmdResult<ReencryptionProgress> {
        const CMD: &str = "vlob_maintenance_save_reencryption_batch";
        self.check_alive(CMD).await?;
        let items: Vec<ReencryptionItem> = batch
            .into_iter()
            .map(|entry| ReencryptionItem {
                entry_id: entry.entry_id,
                version: entry.version,
                blob: entry.blob,
            })
            .collect();
        let (total, done) = self
            .backend
            .vlob()
            .maintenance_save_reencryption_batch(&self.device_id, realm_id, encryption_revision, &items)
            .await
            .map_err(|e| self.reject(CMD, e))?;
        Ok(ReencryptionProgress { total, done })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Block
    // ─────────────────────────────────────────────────────────────────────────

    async fn block_create(
        &self,
        block_id: &BlockId,
        realm_id: &RealmId,
        block: Vec<u8>,
    ) -> CmdResult<()> {
        const CMD: &str = "block_create";
        self.check_alive(CMD).await?;
        self.backend
            .block()
            .create(&self.device_id, block_id, realm_id, block)
            .await
            .map_err(|e| self.reject(CMD, e))
    }

    async fn block_read(&self, block_id: &BlockId) -> CmdResult<Vec<u8>> {
        const CMD: &str = "block_read";
        self.check_alive(CMD).await?;
        self.backend
            .block()
            .read(&self.device_id, block_id)
            .await
            .map_err(|e| self.reject(CMD, e))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Directory and messages
    // ─────────────────────────────────────────────────────────────────────────

    async fn user_get(&self, user_id: &UserId) -> CmdResult<UserGetRep> {
        const CMD: &str = "user_get";
        self.check_alive(CMD).await?;
        let (user, devices) = self
            .backend
            .user()
            .get_user_with_devices(user_id)
            .await
            .map_err(|e| self.reject(CMD, e))?;
        Ok(UserGetRep {
            user_certificate: user.user_certificate,
            revoked_user_certificate: user.revoked_user_certificate,
            device_certificates: devices
                .into_iter()
                .map(|device| device.device_certificate)
                .collect(),
        })
    }

    async fn device_get(&self, device_id: &DeviceId) -> CmdResult<Vec<u8>> {
        const CMD: &str = "device_get";
        self.check_alive(CMD).await?;
        let device = self
            .backend
            .user()
            .get_device(device_id)
            .await
            .map_err(|e| self.reject(CMD, e))?;
        Ok(device.device_certificate)
    }

    async fn message_get(&self, offset: usize) -> CmdResult<Vec<MessageRep>> {
        const CMD: &str = "message_get";
        self.check_alive(CMD).await?;
        let messages = self
            .backend
            .message()
            .get(self.device_id.user_id(), offset)
            .await
            .map_err(|e| self.reject(CMD, e))?;
        Ok(messages
            .into_iter()
            .map(|(index, message)| MessageRep {
                count: index as u64 + 1,
                sender: message.sender,
                timestamp: message.timestamp,
                body: message.body,
            })
            .collect())
    }
}
