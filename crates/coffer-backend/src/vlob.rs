//! Versioned encrypted blobs.
//!
//! Any role holder reads; contributors and above write. Nothing is read or
//! written while the realm is in maintenance, except through the
//! reencryption batches.

use std::sync::Arc;

use tracing::debug;

use coffer_core::{DeviceId, EntryId, RealmId, RealmRole, RealmStatus, Timestamp};
use coffer_store::{ReencryptionItem, RealmStore, StoreError, VlobAtom};

use crate::error::VlobError;
use crate::locks::RealmLocks;
use crate::realm::load_role_log;

type Result<T> = std::result::Result<T, VlobError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

pub struct VlobComponent {
    store: Arc<dyn RealmStore>,
    locks: Arc<RealmLocks>,
}

impl VlobComponent {
    pub fn new(store: Arc<dyn RealmStore>, locks: Arc<RealmLocks>) -> Self {
        Self { store, locks }
    }

    async fn check_access(
        &self,
        author: &DeviceId,
        realm_id: &RealmId,
        access: Access,
    ) -> Result<RealmStatus> {
        let status = self
            .store
            .get_realm_status(realm_id)
            .await?
            .ok_or_else(|| VlobError::NotFound(format!("realm `{}` doesn't exist", realm_id)))?;

        let role = load_role_log(self.store.as_ref(), realm_id)
            .await?
            .role_of(author.user_id());
        let allowed = match access {
            Access::Read => role.is_some(),
            Access::Write => role.map_or(false, RealmRole::can_write),
        };
        if !allowed {
            return Err(VlobError::NotAllowed(format!(
                "`{}` cannot {} realm `{}`",
                author,
                if access == Access::Read { "read" } else { "write" },
                realm_id
            )));
        }
        Ok(status)
    }

    /// Access check for regular (non-maintenance) operations.
    async fn check_operation(
        &self,
        author: &DeviceId,
        realm_id: &RealmId,
        encryption_revision: Option<u64>,
        access: Access,
    ) -> Result<RealmStatus> {
        let status = self.check_access(author, realm_id, access).await?;
        if status.in_maintenance() {
            return Err(VlobError::InMaintenance(*realm_id));
        }
        if let Some(revision) = encryption_revision {
            if revision != status.encryption_revision {
                return Err(VlobError::BadEncryptionRevision(format!(
                    "realm is at revision {}, got {}",
                    status.encryption_revision, revision
                )));
            }
        }
        Ok(status)
    }

    async fn realm_of(&self, entry_id: &EntryId) -> Result<RealmId> {
        self.store
            .get_vlob_realm(entry_id)
            .await?
            .ok_or_else(|| VlobError::NotFound(format!("vlob `{}` doesn't exist", entry_id)))
    }

    pub async fn create(
        &self,
        author: &DeviceId,
        realm_id: &RealmId,
        encryption_revision: u64,
        entry_id: &EntryId,
        timestamp: Timestamp,
        blob: Vec<u8>,
    ) -> Result<()> {
        let _guard = self.locks.lock(realm_id).await;
        self.check_operation(author, realm_id, Some(encryption_revision), Access::Write)
            .await?;
        if self.store.get_vlob_realm(entry_id).await?.is_some() {
            return Err(VlobError::AlreadyExists(*entry_id));
        }

        let atom = VlobAtom {
            realm_id: *realm_id,
            entry_id: *entry_id,
            encryption_revision,
            version: 1,
            blob,
            author: author.clone(),
            timestamp,
        };
        self.store.insert_vlob_atom(&atom).await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => VlobError::AlreadyExists(*entry_id),
            e => e.into(),
        })?;
        debug!(realm_id = %realm_id, entry_id = %entry_id, "vlob created");
        Ok(())
    }

    pub async fn update(
        &self,
        author: &DeviceId,
        encryption_revision: u64,
        entry_id: &EntryId,
        version: u64,
        timestamp: Timestamp,
        blob: Vec<u8>,
    ) -> Result<()> {
        let realm_id = self.realm_of(entry_id).await?;
        let _guard = self.locks.lock(&realm_id).await;
        self.check_operation(author, &realm_id, Some(encryption_revision), Access::Write)
            .await?;

        let last = self
            .store
            .read_vlob_atom(entry_id, encryption_revision, None, None)
            .await?
            .ok_or_else(|| VlobError::NotFound(format!("vlob `{}` doesn't exist", entry_id)))?;
        if version != last.version + 1 {
            return Err(VlobError::BadVersion(format!(
                "expected version {}, got {}",
                last.version + 1,
                version
            )));
        }
        if timestamp < last.timestamp {
            return Err(VlobError::BadTimestamp(format!(
                "version {} is dated {}, before version {} ({})",
                version, timestamp, last.version, last.timestamp
            )));
        }

        let atom = VlobAtom {
            realm_id,
            entry_id: *entry_id,
            encryption_revision,
            version,
            blob,
            author: author.clone(),
            timestamp,
        };
        self.store.insert_vlob_atom(&atom).await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => {
                VlobError::BadVersion(format!("version {} already exists", version))
            }
            e => e.into(),
        })?;
        debug!(realm_id = %realm_id, entry_id = %entry_id, version, "vlob updated");
        Ok(())
    }

    /// Read a version, or the last version not after `timestamp`, or the
    /// latest version.
    pub async fn read(
        &self,
        author: &DeviceId,
        encryption_revision: u64,
        entry_id: &EntryId,
        version: Option<u64>,
        timestamp: Option<Timestamp>,
    ) -> Result<VlobAtom> {
        let realm_id = self.realm_of(entry_id).await?;
        self.check_operation(author, &realm_id, Some(encryption_revision), Access::Read)
            .await?;

        let atom = self
            .store
            .read_vlob_atom(entry_id, encryption_revision, version, timestamp)
            .await?;
        match (atom, version, timestamp) {
            (Some(atom), _, _) => Ok(atom),
            (None, Some(version), _) => Err(VlobError::BadVersion(format!(
                "vlob `{}` has no version {}",
                entry_id, version
            ))),
            (None, None, Some(timestamp)) => Err(VlobError::BadTimestamp(format!(
                "vlob `{}` has no version at {}",
                entry_id, timestamp
            ))),
            (None, None, None) => Err(VlobError::NotFound(format!(
                "vlob `{}` doesn't exist",
                entry_id
            ))),
        }
    }

    /// Every version of an entry with its timestamp and author.
    pub async fn list_versions(&self, author: &DeviceId, entry_id: &EntryId) -> Result<Vec<VlobAtom>> {
        let realm_id = self.realm_of(entry_id).await?;
        let status = self
            .check_operation(author, &realm_id, None, Access::Read)
            .await?;
        Ok(self
            .store
            .list_vlob_atoms(entry_id, status.encryption_revision)
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reencryption
    // ─────────────────────────────────────────────────────────────────────────

    async fn check_maintenance(
        &self,
        author: &DeviceId,
        realm_id: &RealmId,
        encryption_revision: u64,
    ) -> Result<()> {
        let status = self.check_access(author, realm_id, Access::Read).await?;
        if !status.in_maintenance() {
            return Err(VlobError::NotInMaintenance(*realm_id));
        }
        if encryption_revision != status.encryption_revision {
            return Err(VlobError::BadEncryptionRevision(format!(
                "realm is reencrypting to revision {}, got {}",
                status.encryption_revision, encryption_revision
            )));
        }
        Ok(())
    }

    /// Up to `size` vlob versions of the previous revision still to reencrypt.
    pub async fn maintenance_get_reencryption_batch(
        &self,
        author: &DeviceId,
        realm_id: &RealmId,
        encryption_revision: u64,
        size: usize,
    ) -> Result<Vec<ReencryptionItem>> {
        self.check_maintenance(author, realm_id, encryption_revision)
            .await?;
        Ok(self
            .store
            .get_reencryption_batch(realm_id, encryption_revision, size)
            .await?)
    }

    /// Store reencrypted versions. Returns `(total, done)`.
    pub async fn maintenance_save_reencryption_batch(
        &self,
        author: &DeviceId,
        realm_id: &RealmId,
        encryption_revision: u64,
        batch: &[ReencryptionItem],
    ) -> Result<(u64, u64)> {
        let _guard = self.locks.lock(realm_id).await;
        self.check_maintenance(author, realm_id, encryption_revision)
            .await?;
        let (total, done) = self
            .store
            .save_reencryption_batch(realm_id, encryption_revision, batch)
            .await?;
        debug!(realm_id = %realm_id, encryption_revision, total, done, "reencryption batch saved");
        Ok((total, done))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::RoleGrant;
    use coffer_store::MemoryStore;

    fn device(name: &str) -> DeviceId {
        format!("{}@dev1", name).parse().unwrap()
    }

    /// Realm with alice as owner, bob as reader and carol as contributor.
    async fn fixture() -> (Arc<MemoryStore>, VlobComponent, RealmId) {
        let store = Arc::new(MemoryStore::new());
        let realm_id = RealmId::from_bytes([3; 16]);
        let grant = |user: &str, role, at| RoleGrant {
            realm_id,
            user_id: user.parse().unwrap(),
            role: Some(role),
            granted_by: Some(device("alice")),
            granted_on: Timestamp::from_millis(at),
            certificate: vec![],
        };
        store
            .create_realm(&realm_id, &grant("alice", RealmRole::Owner, 1))
            .await
            .unwrap();
        store.append_role_grant(&grant("bob", RealmRole::Reader, 2)).await.unwrap();
        store
            .append_role_grant(&grant("carol", RealmRole::Contributor, 3))
            .await
            .unwrap();
        let vlobs = VlobComponent::new(store.clone(), Arc::new(RealmLocks::new()));
        (store, vlobs, realm_id)
    }

    #[tokio::test]
    async fn test_readers_cannot_write() {
        let (_, vlobs, realm_id) = fixture().await;
        let entry_id = EntryId::new();
        let at = Timestamp::from_millis(10);

        assert!(matches!(
            vlobs.create(&device("bob"), &realm_id, 1, &entry_id, at, b"v1".to_vec()).await,
            Err(VlobError::NotAllowed(_))
        ));
        vlobs
            .create(&device("carol"), &realm_id, 1, &entry_id, at, b"v1".to_vec())
            .await
            .unwrap();
        let atom = vlobs.read(&device("bob"), 1, &entry_id, None, None).await.unwrap();
        assert_eq!(atom.blob, b"v1".to_vec());
        assert_eq!(atom.author, device("carol"));

        assert!(matches!(
            vlobs.read(&device("dave"), 1, &entry_id, None, None).await,
            Err(VlobError::NotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn test_create_checks() {
        let (_, vlobs, realm_id) = fixture().await;
        let entry_id = EntryId::new();
        let at = Timestamp::from_millis(10);

        assert!(matches!(
            vlobs.create(&device("alice"), &RealmId::new(), 1, &entry_id, at, vec![]).await,
            Err(VlobError::NotFound(_))
        ));
        assert!(matches!(
            vlobs.create(&device("alice"), &realm_id, 2, &entry_id, at, vec![]).await,
            Err(VlobError::BadEncryptionRevision(_))
        ));
        vlobs.create(&device("alice"), &realm_id, 1, &entry_id, at, vec![]).await.unwrap();
        assert!(matches!(
            vlobs.create(&device("alice"), &realm_id, 1, &entry_id, at, vec![]).await,
            Err(VlobError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_update_version_and_timestamp() {
        let (_, vlobs, realm_id) = fixture().await;
        let alice = device("alice");
        let entry_id = EntryId::new();
        vlobs
            .create(&alice, &realm_id, 1, &entry_id, Timestamp::from_millis(10), b"v1".to_vec())
            .await
            .unwrap();

        assert!(matches!(
            vlobs.update(&alice, 1, &entry_id, 3, Timestamp::from_millis(20), vec![]).await,
            Err(VlobError::BadVersion(_))
        ));
        assert!(matches!(
            vlobs.update(&alice, 1, &entry_id, 2, Timestamp::from_millis(5), vec![]).await,
            Err(VlobError::BadTimestamp(_))
        ));
        assert!(matches!(
            vlobs.update(&alice, 1, &EntryId::new(), 2, Timestamp::from_millis(20), vec![]).await,
            Err(VlobError::NotFound(_))
        ));
        vlobs
            .update(&alice, 1, &entry_id, 2, Timestamp::from_millis(20), b"v2".to_vec())
            .await
            .unwrap();

        let versions = vlobs.list_versions(&alice, &entry_id).await.unwrap();
        assert_eq!(
            versions.iter().map(|atom| atom.version).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let at_15 = vlobs
            .read(&alice, 1, &entry_id, None, Some(Timestamp::from_millis(15)))
            .await
            .unwrap();
        assert_eq!(at_15.version, 1);
        assert!(matches!(
            vlobs.read(&alice, 1, &entry_id, Some(9), None).await,
            Err(VlobError::BadVersion(_))
        ));
        assert!(matches!(
            vlobs.read(&alice, 1, &entry_id, None, Some(Timestamp::from_millis(1))).await,
            Err(VlobError::BadTimestamp(_))
        ));
    }

    #[tokio::test]
    async fn test_maintenance_blocks_regular_access() {
        let (store, vlobs, realm_id) = fixture().await;
        let alice = device("alice");
        let entry_id = EntryId::new();
        vlobs
            .create(&alice, &realm_id, 1, &entry_id, Timestamp::from_millis(10), b"v1".to_vec())
            .await
            .unwrap();

        assert!(matches!(
            vlobs.maintenance_get_reencryption_batch(&alice, &realm_id, 2, 10).await,
            Err(VlobError::NotInMaintenance(_))
        ));

        let status = store.get_realm_status(&realm_id).await.unwrap().unwrap();
        let status = status.start_reencryption(2, alice.clone(), Timestamp::from_millis(11));
        store.start_reencryption(&realm_id, &status).await.unwrap();

        assert!(matches!(
            vlobs.read(&alice, 1, &entry_id, None, None).await,
            Err(VlobError::InMaintenance(_))
        ));
        assert!(matches!(
            vlobs.update(&alice, 2, &entry_id, 2, Timestamp::from_millis(12), vec![]).await,
            Err(VlobError::InMaintenance(_))
        ));

        assert!(matches!(
            vlobs.maintenance_get_reencryption_batch(&alice, &realm_id, 3, 10).await,
            Err(VlobError::BadEncryptionRevision(_))
        ));
        let batch = vlobs
            .maintenance_get_reencryption_batch(&device("bob"), &realm_id, 2, 10)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        let (total, done) = vlobs
            .maintenance_save_reencryption_batch(&alice, &realm_id, 2, &batch)
            .await
            .unwrap();
        assert_eq!((total, done), (1, 1));
    }
}
