//! Remote loader: fetches, verifies and uploads a workspace's manifests and
//! blocks.
//!
//! Every downloaded manifest is checked three ways before being returned:
//!
//! 1. it decrypts with the workspace key and its signature verifies against
//!    the author's device key, resolved through the trustchain;
//! 2. it claims the entry, version, author and timestamp the backend
//!    reported;
//! 3. its author held a writing role on the realm at that timestamp.
//!
//! The role check runs against a cached, timestamped snapshot of the realm's
//! role certificates, refreshed whenever the snapshot is not provably newer
//! than the instant being checked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use coffer_core::{
    validate_realm_root_certificate, Certificate, DeviceCertificate, DeviceId, EntryId, HashDigest,
    RealmId, RealmRole, RealmRoleCertificate, RevokedUserCertificate, Timestamp, UserCertificate,
    UserId, VerifyKey, DEFAULT_BALLPARK_MS,
};
use coffer_perms::{can_update_role, PublicKey, RekeyMessage, RemoteManifest, RoleLog, SecretKey};

use crate::devices::RemoteDevicesManager;
use crate::error::{translate_cmd_error, FsError, Result};
use crate::local::LocalStorage;
use crate::messages::{Status, VlobReadRep, VlobVersions};
use crate::reencryption::ReencryptionJob;
use crate::transport::BackendCmds;
use crate::types::{BlockAccess, LocalDevice, WorkspaceEntry};

/// Configuration of a remote loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Accepted distance between a manifest's timestamp and the local clock
    /// when uploading.
    pub clock_skew: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::from_millis(DEFAULT_BALLPARK_MS as u64),
        }
    }
}

/// Verified role certificates of the realm, as of `fetched_at`.
struct RoleCache {
    fetched_at: Timestamp,
    log: RoleLog,
}

/// Client-side access to one workspace's remote data.
pub struct RemoteLoader<C, L> {
    device: Arc<LocalDevice>,
    workspace: Arc<RwLock<WorkspaceEntry>>,
    cmds: Arc<C>,
    devices: Arc<RemoteDevicesManager<C>>,
    local_storage: Arc<L>,
    config: LoaderConfig,
    /// Set on historical views: the instant they show.
    pinned_at: Option<Timestamp>,
    role_cache: Mutex<Option<RoleCache>>,
}

impl<C: BackendCmds, L: LocalStorage> RemoteLoader<C, L> {
    pub fn new(
        device: LocalDevice,
        workspace: WorkspaceEntry,
        cmds: Arc<C>,
        root_verify_key: VerifyKey,
        local_storage: Arc<L>,
        config: LoaderConfig,
    ) -> Self {
        let devices = Arc::new(RemoteDevicesManager::new(cmds.clone(), root_verify_key));
        Self {
            device: Arc::new(device),
            workspace: Arc::new(RwLock::new(workspace)),
            cmds,
            devices,
            local_storage,
            config,
            pinned_at: None,
            role_cache: Mutex::new(None),
        }
    }

    /// A read-only view of the workspace as it was at `timestamp`.
    ///
    /// The view shares the connection and workspace key with `self` but keeps
    /// its own role cache.
    pub fn to_timestamped(&self, timestamp: Timestamp) -> Self {
        Self {
            device: self.device.clone(),
            workspace: self.workspace.clone(),
            cmds: self.cmds.clone(),
            devices: self.devices.clone(),
            local_storage: self.local_storage.clone(),
            config: self.config.clone(),
            pinned_at: Some(timestamp),
            role_cache: Mutex::new(None),
        }
    }

    /// The instant a historical view is pinned to.
    pub fn pinned_at(&self) -> Option<Timestamp> {
        self.pinned_at
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device.device_id
    }

    pub async fn workspace_entry(&self) -> WorkspaceEntry {
        self.workspace.read().await.clone()
    }

    /// Replace the workspace key, e.g. after a reencryption.
    pub async fn set_workspace_entry(&self, entry: WorkspaceEntry) {
        *self.workspace.write().await = entry;
    }

    async fn realm_id(&self) -> RealmId {
        self.workspace.read().await.realm_id
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        match self.pinned_at {
            Some(timestamp) => Err(FsError::ReadOnly(format!(
                "cannot {} through a view pinned at {}",
                operation, timestamp
            ))),
            None => Ok(()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identities
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_user(
        &self,
        user_id: &UserId,
        no_cache: bool,
    ) -> Result<(UserCertificate, Option<RevokedUserCertificate>)> {
        Ok(self.devices.get_user(user_id, no_cache).await?)
    }

    pub async fn get_device(&self, device_id: &DeviceId, no_cache: bool) -> Result<DeviceCertificate> {
        Ok(self.devices.get_device(device_id, no_cache).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Realm roles
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch and verify every role certificate of the realm, in timestamp
    /// order, together with the roles they fold into.
    ///
    /// Each certificate must verify against its author's device key, and its
    /// author must have held the right to issue it at that point of the log.
    async fn fetch_role_certificates(
        &self,
        realm_id: &RealmId,
    ) -> Result<(Vec<RealmRoleCertificate>, HashMap<UserId, RealmRole>)> {
        let raw_certificates = self
            .cmds
            .realm_get_role_certificates(realm_id, None)
            .await
            .map_err(|e| {
                translate_cmd_error(e, |rejection| match rejection.status {
                    Status::NotAllowed => {
                        FsError::NoReadAccess("cannot get workspace roles".into())
                    }
                    _ => FsError::Other(format!("cannot retrieve workspace roles: {}", rejection)),
                })
            })?;

        let mut unsecure = raw_certificates
            .into_iter()
            .map(|raw| RealmRoleCertificate::unsecure_load(&raw).map(|certif| (certif, raw)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| FsError::InvalidData(format!("invalid realm role certificates: {}", e)))?;
        unsecure.sort_by_key(|(certif, _)| certif.timestamp);

        let mut current_roles: HashMap<UserId, RealmRole> = HashMap::new();
        let mut certificates = Vec::with_capacity(unsecure.len());
        for (unsecure_certif, raw) in unsecure {
            let author_id = unsecure_certif.author.clone().ok_or_else(|| {
                FsError::InvalidData("realm role certificate without author".into())
            })?;
            let author = self.devices.get_device(&author_id, false).await?;
            let certif =
                RealmRoleCertificate::verify_and_load(&raw, &author.verify_key, Some(&author_id))
                    .map_err(|e| {
                        FsError::InvalidData(format!("invalid realm role certificates: {}", e))
                    })?;

            let allowed = if current_roles.is_empty() {
                validate_realm_root_certificate(&certif).is_ok()
            } else {
                can_update_role(
                    current_roles.get(author_id.user_id()).copied(),
                    current_roles.get(&certif.user_id).copied(),
                    certif.role,
                )
            };
            if !allowed {
                return Err(FsError::InvalidData(format!(
                    "invalid realm role certificates: {} has no right to give {} role to {} on {}",
                    author_id,
                    certif.role.map_or("no", RealmRole::as_str),
                    certif.user_id,
                    certif.timestamp
                )));
            }

            match certif.role {
                Some(role) => {
                    current_roles.insert(certif.user_id.clone(), role);
                }
                None => {
                    current_roles.remove(&certif.user_id);
                }
            }
            certificates.push(certif);
        }

        Ok((certificates, current_roles))
    }

    /// Verified role certificates of `realm_id`, or of this workspace.
    pub async fn load_realm_role_certificates(
        &self,
        realm_id: Option<&RealmId>,
    ) -> Result<Vec<RealmRoleCertificate>> {
        let realm_id = match realm_id {
            Some(realm_id) => *realm_id,
            None => self.realm_id().await,
        };
        Ok(self.fetch_role_certificates(&realm_id).await?.0)
    }

    /// Current roles of `realm_id`, or of this workspace.
    pub async fn load_realm_current_roles(
        &self,
        realm_id: Option<&RealmId>,
    ) -> Result<HashMap<UserId, RealmRole>> {
        let realm_id = match realm_id {
            Some(realm_id) => *realm_id,
            None => self.realm_id().await,
        };
        Ok(self.fetch_role_certificates(&realm_id).await?.1)
    }

    /// Role `user_id` held on this workspace at `timestamp`.
    async fn user_realm_role_at(
        &self,
        user_id: &UserId,
        timestamp: Timestamp,
    ) -> Result<Option<RealmRole>> {
        let mut cache = self.role_cache.lock().await;
        let stale = cache
            .as_ref()
            .map_or(true, |cached| cached.fetched_at <= timestamp);
        if stale {
            let fetched_at = Timestamp::now();
            let realm_id = self.realm_id().await;
            let (certificates, _) = self.fetch_role_certificates(&realm_id).await?;
            let mut log = RoleLog::new();
            for certif in certificates {
                log.push(certif.user_id, certif.role, certif.timestamp);
            }
            debug!(realm_id = %realm_id, entries = log.len(), "role certificates cache refreshed");
            *cache = Some(RoleCache { fetched_at, log });
        }
        Ok(cache
            .as_ref()
            .and_then(|cached| cached.log.role_at(user_id, timestamp)))
    }

    /// Create the realm backing this workspace. Retrying after an
    /// unconfirmed attempt is harmless.
    pub async fn create_realm(&self, realm_id: &RealmId) -> Result<()> {
        let certif = RealmRoleCertificate::build_realm_root_certif(
            self.device.device_id.clone(),
            Timestamp::now(),
            *realm_id,
        )
        .dump_and_sign(&self.device.signing_key);

        match self.cmds.realm_create(&certif).await {
            Ok(()) => {
                info!(realm_id = %realm_id, "realm created");
                Ok(())
            }
            Err(e) if e.status() == Some(Status::AlreadyExists) => Ok(()),
            Err(e) => Err(translate_cmd_error(e, |rejection| {
                FsError::Other(format!("cannot create realm {}: {}", realm_id, rejection))
            })),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Blocks
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch blocks one after the other. Stopping between two fetches leaves
    /// nothing half done.
    pub async fn load_blocks(&self, accesses: &[BlockAccess]) -> Result<()> {
        for access in accesses {
            self.load_block(access).await?;
        }
        Ok(())
    }

    pub async fn load_block(&self, access: &BlockAccess) -> Result<()> {
        let ciphered = self.cmds.block_read(&access.id).await.map_err(|e| {
            translate_cmd_error(e, |rejection| match rejection.status {
                Status::NotFound => FsError::RemoteBlockNotFound(access.id),
                Status::NotAllowed => FsError::NoReadAccess("cannot load block".into()),
                Status::InMaintenance => FsError::InMaintenance(
                    "cannot download block while the workspace is in maintenance".into(),
                ),
                _ => FsError::Other(format!("cannot download block: {}", rejection)),
            })
        })?;

        let block = access
            .key
            .decrypt(&ciphered)
            .map_err(|e| FsError::InvalidData(format!("cannot decrypt block: {}", e)))?;
        if HashDigest::hash(&block) != access.digest {
            return Err(FsError::InvalidData(format!(
                "block `{}` does not match its digest",
                access.id
            )));
        }

        self.local_storage.set_clean_block(&access.id, block).await
    }

    pub async fn upload_block(&self, access: &BlockAccess, data: &[u8]) -> Result<()> {
        self.ensure_writable("upload block")?;

        let ciphered = access
            .key
            .encrypt(data)
            .map_err(|e| FsError::InvalidData(format!("cannot encrypt block: {}", e)))?;

        let realm_id = self.realm_id().await;
        match self.cmds.block_create(&access.id, &realm_id, ciphered).await {
            Ok(()) => {}
            // Uploaded before, but the local storage missed the update.
            Err(e) if e.status() == Some(Status::AlreadyExists) => {}
            Err(e) => {
                return Err(translate_cmd_error(e, |rejection| match rejection.status {
                    Status::NotAllowed => FsError::NoWriteAccess("cannot upload block".into()),
                    Status::InMaintenance => FsError::InMaintenance(
                        "cannot upload block while the workspace is in maintenance".into(),
                    ),
                    _ => FsError::Other(format!("cannot upload block: {}", rejection)),
                }))
            }
        }

        self.local_storage
            .set_clean_block(&access.id, data.to_vec())
            .await?;
        self.local_storage.clear_chunk(&access.id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Manifests
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn list_versions(&self, entry_id: &EntryId) -> Result<VlobVersions> {
        self.cmds.vlob_list_versions(entry_id).await.map_err(|e| {
            translate_cmd_error(e, |rejection| match rejection.status {
                Status::NotAllowed => FsError::NoReadAccess("cannot list versions".into()),
                Status::NotFound => FsError::RemoteManifestNotFound(*entry_id),
                Status::InMaintenance => FsError::InMaintenance(
                    "cannot list versions while the workspace is in maintenance".into(),
                ),
                _ => FsError::Other(format!("cannot fetch vlob {}: {}", entry_id, rejection)),
            })
        })
    }

    /// Download and check one manifest version.
    ///
    /// At most one of `version` and `timestamp` may be given; with neither,
    /// the latest version is loaded (or, on a historical view, the one
    /// current at the pinned instant). `expected_backend_timestamp` checks
    /// the timestamp the backend reports.
    pub async fn load_manifest(
        &self,
        entry_id: &EntryId,
        version: Option<u64>,
        timestamp: Option<Timestamp>,
        expected_backend_timestamp: Option<Timestamp>,
    ) -> Result<RemoteManifest> {
        if let (Some(version), Some(timestamp)) = (version, timestamp) {
            return Err(FsError::Other(format!(
                "supplied both version {} and timestamp `{}` for manifest `{}`",
                version, timestamp, entry_id
            )));
        }
        let timestamp = match (version, timestamp) {
            (None, None) => self.pinned_at,
            _ => timestamp,
        };

        let workspace = self.workspace_entry().await;
        let rep = self
            .cmds
            .vlob_read(workspace.encryption_revision, entry_id, version, timestamp)
            .await
            .map_err(|e| {
                translate_cmd_error(e, |rejection| match rejection.status {
                    Status::NotFound => FsError::RemoteManifestNotFound(*entry_id),
                    Status::NotAllowed => FsError::NoReadAccess("cannot load manifest".into()),
                    Status::BadVersion => FsError::RemoteManifestNotFoundBadVersion(*entry_id),
                    Status::BadTimestamp => FsError::RemoteManifestNotFoundBadTimestamp(*entry_id),
                    Status::BadEncryptionRevision => FsError::BadEncryptionRevision(format!(
                        "cannot fetch vlob {}",
                        entry_id
                    )),
                    Status::InMaintenance => FsError::InMaintenance(
                        "cannot download vlob while the workspace is in maintenance".into(),
                    ),
                    _ => FsError::Other(format!("cannot fetch vlob {}: {}", entry_id, rejection)),
                })
            })?;
        let VlobReadRep {
            version: expected_version,
            blob,
            author: expected_author,
            timestamp: expected_timestamp,
        } = rep;

        if let Some(version) = version {
            if version != expected_version {
                return Err(FsError::InvalidData(format!(
                    "backend returned invalid version for vlob {} (expecting {}, got {})",
                    entry_id, version, expected_version
                )));
            }
        }
        if let Some(expected) = expected_backend_timestamp {
            if expected != expected_timestamp {
                return Err(FsError::InvalidData(format!(
                    "backend returned invalid timestamp for vlob {} at version {} \
                     (expecting {}, got {})",
                    entry_id, expected_version, expected, expected_timestamp
                )));
            }
        }

        let author = self.devices.get_device(&expected_author, false).await?;
        let manifest = RemoteManifest::decrypt_verify_and_load(
            &blob,
            &workspace.key,
            &author.verify_key,
            &expected_author,
            expected_timestamp,
        )
        .map_err(|e| FsError::InvalidData(format!("cannot decrypt vlob: {}", e)))?;
        if manifest.version != expected_version || &manifest.entry_id != entry_id {
            warn!(entry_id = %entry_id, "manifest content does not match the backend reply");
            return Err(FsError::InvalidData(format!(
                "vlob {} version {} holds manifest {} version {}",
                entry_id, expected_version, manifest.entry_id, manifest.version
            )));
        }

        match self
            .user_realm_role_at(expected_author.user_id(), expected_timestamp)
            .await?
        {
            None => Err(FsError::InvalidData(format!(
                "manifest was created at {} by `{}` which had no right to access the \
                 workspace at that time",
                expected_timestamp, expected_author
            ))),
            Some(role) if !role.can_write() => Err(FsError::InvalidData(format!(
                "manifest was created at {} by `{}` which had no write right on the \
                 workspace at that time",
                expected_timestamp, expected_author
            ))),
            Some(_) => Ok(manifest),
        }
    }

    /// Encrypt, sign and upload a new manifest version.
    pub async fn upload_manifest(&self, entry_id: &EntryId, manifest: &RemoteManifest) -> Result<()> {
        self.ensure_writable("upload manifest")?;

        if manifest.author != self.device.device_id {
            return Err(FsError::Other(format!(
                "manifest authored by `{}` cannot be uploaded by `{}`",
                manifest.author, self.device.device_id
            )));
        }
        let now = Timestamp::now();
        let tolerance = self.config.clock_skew.as_millis() as i64;
        if !manifest.timestamp.in_ballpark(now, tolerance) {
            return Err(FsError::Other(format!(
                "manifest timestamp {} too far from local clock {}",
                manifest.timestamp, now
            )));
        }

        let workspace = self.workspace_entry().await;
        let ciphered = manifest
            .dump_sign_and_encrypt(&self.device.signing_key, &workspace.key)
            .map_err(|e| FsError::InvalidData(format!("cannot encrypt vlob: {}", e)))?;

        if manifest.version == 1 {
            self.vlob_create(&workspace, entry_id, manifest, ciphered)
                .await?;
        } else {
            self.vlob_update(&workspace, entry_id, manifest, ciphered)
                .await?;
        }
        self.local_storage
            .set_manifest(entry_id, manifest.clone())
            .await
    }

    async fn vlob_create(
        &self,
        workspace: &WorkspaceEntry,
        entry_id: &EntryId,
        manifest: &RemoteManifest,
        ciphered: Vec<u8>,
    ) -> Result<()> {
        let result = self
            .cmds
            .vlob_create(
                &workspace.realm_id,
                workspace.encryption_revision,
                entry_id,
                manifest.timestamp,
                ciphered,
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.status() == Some(Status::AlreadyExists) => {
                if self.is_retried_create(workspace, entry_id, manifest).await? {
                    debug!(entry_id = %entry_id, "vlob already created by a previous attempt");
                    Ok(())
                } else {
                    warn!(entry_id = %entry_id, "vlob created concurrently");
                    Err(FsError::RemoteSyncError(*entry_id))
                }
            }
            Err(e) => Err(translate_cmd_error(e, |rejection| match rejection.status {
                Status::NotAllowed => FsError::NoWriteAccess("cannot upload manifest".into()),
                Status::BadEncryptionRevision => {
                    FsError::BadEncryptionRevision(format!("cannot create vlob {}", entry_id))
                }
                Status::InMaintenance => FsError::InMaintenance(
                    "cannot create vlob while the workspace is in maintenance".into(),
                ),
                _ => FsError::Other(format!("cannot create vlob {}: {}", entry_id, rejection)),
            })),
        }
    }

    /// Whether the first version of `entry_id` is exactly `manifest`, as
    /// written by this device.
    ///
    /// Only a readable first version that differs answers `false`; failing to
    /// read it back is reported as such.
    async fn is_retried_create(
        &self,
        workspace: &WorkspaceEntry,
        entry_id: &EntryId,
        manifest: &RemoteManifest,
    ) -> Result<bool> {
        let rep = match self
            .cmds
            .vlob_read(workspace.encryption_revision, entry_id, Some(1), None)
            .await
        {
            Ok(rep) => rep,
            Err(e) if matches!(e.status(), Some(Status::NotFound | Status::BadVersion)) => {
                return Ok(false)
            }
            Err(e) => {
                return Err(translate_cmd_error(e, |rejection| match rejection.status {
                    Status::NotAllowed => {
                        FsError::NoReadAccess(format!("cannot read back vlob {}", entry_id))
                    }
                    Status::InMaintenance => FsError::InMaintenance(
                        "cannot read vlob while the workspace is in maintenance".into(),
                    ),
                    _ => FsError::Other(format!("cannot read back vlob {}: {}", entry_id, rejection)),
                }))
            }
        };
        if rep.author != self.device.device_id || rep.timestamp != manifest.timestamp {
            return Ok(false);
        }
        Ok(RemoteManifest::decrypt_verify_and_load(
            &rep.blob,
            &workspace.key,
            &self.device.signing_key.verify_key(),
            &self.device.device_id,
            manifest.timestamp,
        )
        .map_or(false, |remote| &remote == manifest))
    }

    async fn vlob_update(
        &self,
        workspace: &WorkspaceEntry,
        entry_id: &EntryId,
        manifest: &RemoteManifest,
        ciphered: Vec<u8>,
    ) -> Result<()> {
        self.cmds
            .vlob_update(
                workspace.encryption_revision,
                entry_id,
                manifest.version,
                manifest.timestamp,
                ciphered,
            )
            .await
            .map_err(|e| {
                translate_cmd_error(e, |rejection| match rejection.status {
                    Status::NotFound | Status::BadVersion => {
                        warn!(entry_id = %entry_id, version = manifest.version, "vlob update conflict");
                        FsError::RemoteSyncError(*entry_id)
                    }
                    Status::NotAllowed => FsError::NoWriteAccess("cannot upload manifest".into()),
                    // Going offline avoids racing a writer holding a later timestamp.
                    Status::BadTimestamp => FsError::BackendOffline(format!(
                        "cannot update vlob {}: {}",
                        entry_id, rejection
                    )),
                    Status::BadEncryptionRevision => {
                        FsError::BadEncryptionRevision(format!("cannot update vlob {}", entry_id))
                    }
                    Status::InMaintenance => FsError::InMaintenance(
                        "cannot update vlob while the workspace is in maintenance".into(),
                    ),
                    _ => FsError::Other(format!("cannot update vlob {}: {}", entry_id, rejection)),
                })
            })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reencryption
    // ─────────────────────────────────────────────────────────────────────────

    /// Put the realm in maintenance towards a new encryption revision keyed
    /// by `new_key`, sealing the key to every non-revoked participant.
    pub async fn start_reencryption(&self, new_key: SecretKey) -> Result<ReencryptionJob<C>> {
        self.ensure_writable("start reencryption")?;

        let workspace = self.workspace_entry().await;
        let new_workspace = workspace.rekeyed(new_key.clone());
        let rekey = RekeyMessage::new(
            workspace.realm_id,
            new_workspace.encryption_revision,
            new_key,
        );

        let roles = self.load_realm_current_roles(Some(&workspace.realm_id)).await?;
        let mut per_participant_message = HashMap::with_capacity(roles.len());
        for user_id in roles.keys() {
            let (user, revoked_user) = self.devices.get_user(user_id, true).await?;
            if revoked_user.is_some() {
                continue;
            }
            let sealed = rekey
                .seal(&PublicKey::from_bytes(user.public_key))
                .map_err(|e| FsError::Other(format!("cannot seal re-key message: {}", e)))?;
            per_participant_message.insert(user_id.clone(), sealed);
        }

        self.cmds
            .realm_start_reencryption_maintenance(
                &workspace.realm_id,
                new_workspace.encryption_revision,
                Timestamp::now(),
                per_participant_message,
            )
            .await
            .map_err(|e| {
                translate_cmd_error(e, |rejection| match rejection.status {
                    Status::NotAllowed => {
                        FsError::NoWriteAccess("only the owner can start a reencryption".into())
                    }
                    Status::InMaintenance => {
                        FsError::InMaintenance("a reencryption is already running".into())
                    }
                    Status::BadEncryptionRevision => FsError::BadEncryptionRevision(format!(
                        "cannot start reencryption to revision {}",
                        new_workspace.encryption_revision
                    )),
                    _ => FsError::Other(format!("cannot start reencryption: {}", rejection)),
                })
            })?;
        info!(
            realm_id = %workspace.realm_id,
            encryption_revision = new_workspace.encryption_revision,
            "reencryption started"
        );

        Ok(ReencryptionJob::new(self.cmds.clone(), workspace, new_workspace))
    }

    /// Close the maintenance once `job` is complete, and switch this loader
    /// to the new workspace key.
    pub async fn finish_reencryption(&self, job: &ReencryptionJob<C>) -> Result<()> {
        let new_workspace = job.new_workspace_entry();
        self.cmds
            .realm_finish_reencryption_maintenance(
                &new_workspace.realm_id,
                new_workspace.encryption_revision,
            )
            .await
            .map_err(|e| {
                translate_cmd_error(e, |rejection| match rejection.status {
                    Status::NotAllowed => {
                        FsError::NoWriteAccess("only the owner can finish a reencryption".into())
                    }
                    Status::NotInMaintenance => {
                        FsError::Other("no reencryption is running".into())
                    }
                    Status::BadEncryptionRevision => FsError::BadEncryptionRevision(format!(
                        "cannot finish reencryption to revision {}",
                        new_workspace.encryption_revision
                    )),
                    _ => FsError::Other(format!("cannot finish reencryption: {}", rejection)),
                })
            })?;
        self.set_workspace_entry(new_workspace.clone()).await;
        info!(
            realm_id = %new_workspace.realm_id,
            encryption_revision = new_workspace.encryption_revision,
            "reencryption finished"
        );
        Ok(())
    }
}
