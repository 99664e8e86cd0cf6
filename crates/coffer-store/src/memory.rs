//! In-memory implementation of the store traits.
//!
//! This is the reference backend and the one used by tests. It has the same
//! semantics as SQLite but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use coffer_core::{
    BlockId, DeviceId, EntryId, RealmId, RealmStatus, RoleGrant, Timestamp, UserId,
};

use crate::error::{Result, StoreError};
use crate::traits::{
    DeviceEntry, DirectoryStore, RealmStats, RealmStore, ReencryptionItem, StoredBlock,
    StoredMessage, UserEntry, VlobAtom,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    realms: HashMap<RealmId, RealmRecord>,
    vlobs: HashMap<EntryId, VlobRecord>,
    blocks: HashMap<BlockId, StoredBlock>,
    users: BTreeMap<UserId, UserEntry>,
    devices: HashMap<DeviceId, DeviceEntry>,
    messages: HashMap<UserId, Vec<StoredMessage>>,
}

struct RealmRecord {
    status: RealmStatus,
    grants: Vec<RoleGrant>,
    buckets: BTreeSet<u64>,
    /// Entries in creation order.
    entries: Vec<EntryId>,
}

struct VlobRecord {
    realm_id: RealmId,
    /// Keyed by `(encryption_revision, version)`.
    atoms: BTreeMap<(u64, u64), VlobAtom>,
}

impl MemoryStoreInner {
    fn realm(&self, realm_id: &RealmId) -> Result<&RealmRecord> {
        self.realms
            .get(realm_id)
            .ok_or_else(|| StoreError::NotFound(format!("realm {}", realm_id)))
    }

    fn realm_mut(&mut self, realm_id: &RealmId) -> Result<&mut RealmRecord> {
        self.realms
            .get_mut(realm_id)
            .ok_or_else(|| StoreError::NotFound(format!("realm {}", realm_id)))
    }

    fn count_at(&self, realm: &RealmRecord, revision: u64) -> u64 {
        realm
            .entries
            .iter()
            .filter_map(|entry_id| self.vlobs.get(entry_id))
            .map(|vlob| vlob.atoms.keys().filter(|(rev, _)| *rev == revision).count() as u64)
            .sum()
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealmStore for MemoryStore {
    async fn create_realm(&self, realm_id: &RealmId, root_grant: &RoleGrant) -> Result<()> {
        let mut inner = self.write()?;
        if inner.realms.contains_key(realm_id) {
            return Err(StoreError::AlreadyExists(format!("realm {}", realm_id)));
        }
        let status = RealmStatus::initial();
        let buckets = BTreeSet::from([status.encryption_revision]);
        inner.realms.insert(
            *realm_id,
            RealmRecord {
                status,
                grants: vec![root_grant.clone()],
                buckets,
                entries: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_realm_status(&self, realm_id: &RealmId) -> Result<Option<RealmStatus>> {
        let inner = self.read()?;
        Ok(inner.realms.get(realm_id).map(|r| r.status.clone()))
    }

    async fn set_realm_status(&self, realm_id: &RealmId, status: &RealmStatus) -> Result<()> {
        let mut inner = self.write()?;
        inner.realm_mut(realm_id)?.status = status.clone();
        Ok(())
    }

    async fn start_reencryption(&self, realm_id: &RealmId, status: &RealmStatus) -> Result<()> {
        let mut inner = self.write()?;
        let realm = inner.realm_mut(realm_id)?;
        realm.status = status.clone();
        realm.buckets.insert(status.encryption_revision);
        Ok(())
    }

    async fn get_realm_ids_for_user(&self, user_id: &UserId) -> Result<Vec<RealmId>> {
        let inner = self.read()?;
        let mut ids: Vec<RealmId> = inner
            .realms
            .iter()
            .filter(|(_, realm)| realm.grants.iter().any(|g| &g.user_id == user_id))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn append_role_grant(&self, grant: &RoleGrant) -> Result<()> {
        let mut inner = self.write()?;
        inner.realm_mut(&grant.realm_id)?.grants.push(grant.clone());
        Ok(())
    }

    async fn get_role_grants(
        &self,
        realm_id: &RealmId,
        since: Option<Timestamp>,
    ) -> Result<Vec<RoleGrant>> {
        let inner = self.read()?;
        let mut grants: Vec<RoleGrant> = inner
            .realm(realm_id)?
            .grants
            .iter()
            .filter(|g| since.map_or(true, |since| g.granted_on > since))
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.granted_on);
        Ok(grants)
    }

    async fn create_vlob_revision_bucket(&self, realm_id: &RealmId, revision: u64) -> Result<()> {
        let mut inner = self.write()?;
        inner.realm_mut(realm_id)?.buckets.insert(revision);
        Ok(())
    }

    async fn count_items_at_revision(
        &self,
        realm_id: &RealmId,
        revision: u64,
    ) -> Result<Option<u64>> {
        let inner = self.read()?;
        let realm = inner.realm(realm_id)?;
        if !realm.buckets.contains(&revision) {
            return Ok(None);
        }
        Ok(Some(inner.count_at(realm, revision)))
    }

    async fn get_vlob_realm(&self, entry_id: &EntryId) -> Result<Option<RealmId>> {
        let inner = self.read()?;
        Ok(inner.vlobs.get(entry_id).map(|v| v.realm_id))
    }

    async fn insert_vlob_atom(&self, atom: &VlobAtom) -> Result<()> {
        let mut inner = self.write()?;
        let realm = inner.realm(&atom.realm_id)?;
        if !realm.buckets.contains(&atom.encryption_revision) {
            return Err(StoreError::NotFound(format!(
                "revision {} bucket of realm {}",
                atom.encryption_revision, atom.realm_id
            )));
        }

        let key = (atom.encryption_revision, atom.version);
        match inner.vlobs.get_mut(&atom.entry_id) {
            Some(vlob) => {
                if vlob.realm_id != atom.realm_id {
                    return Err(StoreError::InvalidData(format!(
                        "vlob {} belongs to another realm",
                        atom.entry_id
                    )));
                }
                if vlob.atoms.contains_key(&key) {
                    return Err(StoreError::AlreadyExists(format!(
                        "vlob {} version {}",
                        atom.entry_id, atom.version
                    )));
                }
                vlob.atoms.insert(key, atom.clone());
            }
            None => {
                inner.vlobs.insert(
                    atom.entry_id,
                    VlobRecord {
                        realm_id: atom.realm_id,
                        atoms: BTreeMap::from([(key, atom.clone())]),
                    },
                );
                inner.realm_mut(&atom.realm_id)?.entries.push(atom.entry_id);
            }
        }
        Ok(())
    }

    async fn read_vlob_atom(
        &self,
        entry_id: &EntryId,
        revision: u64,
        version: Option<u64>,
        timestamp: Option<Timestamp>,
    ) -> Result<Option<VlobAtom>> {
        let inner = self.read()?;
        let vlob = match inner.vlobs.get(entry_id) {
            Some(vlob) => vlob,
            None => return Ok(None),
        };
        let mut atoms = vlob
            .atoms
            .range((revision, 0)..=(revision, u64::MAX))
            .map(|(_, atom)| atom);

        let found = match (version, timestamp) {
            (Some(version), _) => atoms.find(|a| a.version == version),
            (None, Some(timestamp)) => atoms.filter(|a| a.timestamp <= timestamp).last(),
            (None, None) => atoms.last(),
        };
        Ok(found.cloned())
    }

    async fn list_vlob_atoms(&self, entry_id: &EntryId, revision: u64) -> Result<Vec<VlobAtom>> {
        let inner = self.read()?;
        Ok(inner
            .vlobs
            .get(entry_id)
            .map(|vlob| {
                vlob.atoms
                    .range((revision, 0)..=(revision, u64::MAX))
                    .map(|(_, atom)| atom.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_reencryption_batch(
        &self,
        realm_id: &RealmId,
        revision: u64,
        size: usize,
    ) -> Result<Vec<ReencryptionItem>> {
        let inner = self.read()?;
        let realm = inner.realm(realm_id)?;
        let previous = revision.saturating_sub(1);

        let mut batch = Vec::new();
        for vlob in realm.entries.iter().filter_map(|id| inner.vlobs.get(id)) {
            for ((rev, version), atom) in &vlob.atoms {
                if batch.len() >= size {
                    return Ok(batch);
                }
                if *rev == previous && !vlob.atoms.contains_key(&(revision, *version)) {
                    batch.push(ReencryptionItem {
                        entry_id: atom.entry_id,
                        version: *version,
                        blob: atom.blob.clone(),
                    });
                }
            }
        }
        Ok(batch)
    }

    async fn save_reencryption_batch(
        &self,
        realm_id: &RealmId,
        revision: u64,
        batch: &[ReencryptionItem],
    ) -> Result<(u64, u64)> {
        let mut inner = self.write()?;
        if !inner.realm(realm_id)?.buckets.contains(&revision) {
            return Err(StoreError::NotFound(format!(
                "revision {} bucket of realm {}",
                revision, realm_id
            )));
        }
        let previous = revision.saturating_sub(1);

        for item in batch {
            let vlob = match inner.vlobs.get_mut(&item.entry_id) {
                Some(vlob) if &vlob.realm_id == realm_id => vlob,
                _ => continue,
            };
            if vlob.atoms.contains_key(&(revision, item.version)) {
                continue;
            }
            let original = match vlob.atoms.get(&(previous, item.version)) {
                Some(original) => original.clone(),
                None => continue,
            };
            vlob.atoms.insert(
                (revision, item.version),
                VlobAtom {
                    encryption_revision: revision,
                    blob: item.blob.clone(),
                    ..original
                },
            );
        }

        let realm = inner.realm(realm_id)?;
        Ok((inner.count_at(realm, previous), inner.count_at(realm, revision)))
    }

    async fn create_block(&self, block: &StoredBlock) -> Result<()> {
        let mut inner = self.write()?;
        inner.realm(&block.realm_id)?;
        if inner.blocks.contains_key(&block.block_id) {
            return Err(StoreError::AlreadyExists(format!("block {}", block.block_id)));
        }
        inner.blocks.insert(block.block_id, block.clone());
        Ok(())
    }

    async fn read_block(&self, block_id: &BlockId) -> Result<Option<StoredBlock>> {
        let inner = self.read()?;
        Ok(inner.blocks.get(block_id).cloned())
    }

    async fn get_realm_stats(&self, realm_id: &RealmId) -> Result<RealmStats> {
        let inner = self.read()?;
        let realm = inner.realm(realm_id)?;
        let blocks_size = inner
            .blocks
            .values()
            .filter(|b| &b.realm_id == realm_id)
            .map(|b| b.data.len() as u64)
            .sum();
        let vlobs_size = realm
            .entries
            .iter()
            .filter_map(|id| inner.vlobs.get(id))
            .flat_map(|vlob| vlob.atoms.values())
            .map(|atom| atom.blob.len() as u64)
            .sum();
        Ok(RealmStats {
            blocks_size,
            vlobs_size,
        })
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn create_user(&self, user: &UserEntry, first_device: &DeviceEntry) -> Result<()> {
        let mut inner = self.write()?;
        if inner.users.contains_key(&user.user_id) {
            return Err(StoreError::AlreadyExists(format!("user {}", user.user_id)));
        }
        if inner.devices.contains_key(&first_device.device_id) {
            return Err(StoreError::AlreadyExists(format!(
                "device {}",
                first_device.device_id
            )));
        }
        inner.users.insert(user.user_id.clone(), user.clone());
        inner
            .devices
            .insert(first_device.device_id.clone(), first_device.clone());
        Ok(())
    }

    async fn create_device(&self, device: &DeviceEntry) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.users.contains_key(device.device_id.user_id()) {
            return Err(StoreError::NotFound(format!(
                "user {}",
                device.device_id.user_id()
            )));
        }
        if inner.devices.contains_key(&device.device_id) {
            return Err(StoreError::AlreadyExists(format!("device {}", device.device_id)));
        }
        inner.devices.insert(device.device_id.clone(), device.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserEntry>> {
        let inner = self.read()?;
        Ok(inner.users.get(user_id).cloned())
    }

    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<DeviceEntry>> {
        let inner = self.read()?;
        Ok(inner.devices.get(device_id).cloned())
    }

    async fn get_user_devices(&self, user_id: &UserId) -> Result<Vec<DeviceEntry>> {
        let inner = self.read()?;
        let mut devices: Vec<DeviceEntry> = inner
            .devices
            .values()
            .filter(|d| d.device_id.user_id() == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(devices)
    }

    async fn list_users(&self) -> Result<Vec<UserEntry>> {
        let inner = self.read()?;
        Ok(inner.users.values().cloned().collect())
    }

    async fn revoke_user(
        &self,
        user_id: &UserId,
        revoked_user_certificate: &[u8],
        revoked_user_certifier: &DeviceId,
        revoked_on: Timestamp,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let user = inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;
        user.revoked_on = Some(revoked_on);
        user.revoked_user_certificate = Some(revoked_user_certificate.to_vec());
        user.revoked_user_certifier = Some(revoked_user_certifier.clone());
        Ok(())
    }

    async fn push_message(&self, recipient: &UserId, message: &StoredMessage) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .messages
            .entry(recipient.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn get_messages(&self, recipient: &UserId, offset: usize) -> Result<Vec<StoredMessage>> {
        let inner = self.read()?;
        Ok(inner
            .messages
            .get(recipient)
            .map(|messages| messages.iter().skip(offset).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::RealmRole;

    fn device(s: &str) -> DeviceId {
        s.parse().unwrap()
    }

    fn root_grant(realm_id: RealmId) -> RoleGrant {
        RoleGrant {
            realm_id,
            user_id: "alice".parse().unwrap(),
            role: Some(RealmRole::Owner),
            granted_by: Some(device("alice@dev1")),
            granted_on: Timestamp::from_millis(1),
            certificate: vec![1, 2, 3],
        }
    }

    fn atom(realm_id: RealmId, entry_id: EntryId, revision: u64, version: u64, ts: i64) -> VlobAtom {
        VlobAtom {
            realm_id,
            entry_id,
            encryption_revision: revision,
            version,
            blob: format!("v{}r{}", version, revision).into_bytes(),
            author: device("alice@dev1"),
            timestamp: Timestamp::from_millis(ts),
        }
    }

    #[tokio::test]
    async fn test_create_realm_once() {
        let store = MemoryStore::new();
        let realm_id = RealmId::new();
        store.create_realm(&realm_id, &root_grant(realm_id)).await.unwrap();

        let err = store
            .create_realm(&realm_id, &root_grant(realm_id))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let status = store.get_realm_status(&realm_id).await.unwrap().unwrap();
        assert_eq!(status, RealmStatus::initial());
        assert_eq!(store.count_items_at_revision(&realm_id, 1).await.unwrap(), Some(0));
        assert_eq!(store.count_items_at_revision(&realm_id, 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_role_grants_ordered_and_since() {
        let store = MemoryStore::new();
        let realm_id = RealmId::new();
        store.create_realm(&realm_id, &root_grant(realm_id)).await.unwrap();

        let mut late = root_grant(realm_id);
        late.user_id = "bob".parse().unwrap();
        late.role = Some(RealmRole::Reader);
        late.granted_on = Timestamp::from_millis(30);
        let mut early = late.clone();
        early.granted_on = Timestamp::from_millis(20);
        store.append_role_grant(&late).await.unwrap();
        store.append_role_grant(&early).await.unwrap();

        let grants = store.get_role_grants(&realm_id, None).await.unwrap();
        let times: Vec<i64> = grants.iter().map(|g| g.granted_on.as_millis()).collect();
        assert_eq!(times, vec![1, 20, 30]);

        let since = store
            .get_role_grants(&realm_id, Some(Timestamp::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(since.len(), 1);

        let realms = store
            .get_realm_ids_for_user(&"bob".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(realms, vec![realm_id]);
    }

    #[tokio::test]
    async fn test_vlob_versions() {
        let store = MemoryStore::new();
        let realm_id = RealmId::new();
        let entry_id = EntryId::new();
        store.create_realm(&realm_id, &root_grant(realm_id)).await.unwrap();

        store.insert_vlob_atom(&atom(realm_id, entry_id, 1, 1, 10)).await.unwrap();
        store.insert_vlob_atom(&atom(realm_id, entry_id, 1, 2, 20)).await.unwrap();
        let err = store
            .insert_vlob_atom(&atom(realm_id, entry_id, 1, 2, 30))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let latest = store.read_vlob_atom(&entry_id, 1, None, None).await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        let at_15 = store
            .read_vlob_atom(&entry_id, 1, None, Some(Timestamp::from_millis(15)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at_15.version, 1);
        assert!(store
            .read_vlob_atom(&entry_id, 1, None, Some(Timestamp::from_millis(5)))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.list_vlob_atoms(&entry_id, 1).await.unwrap().len(), 2);
        assert_eq!(store.get_vlob_realm(&entry_id).await.unwrap(), Some(realm_id));
    }

    #[tokio::test]
    async fn test_reencryption_batches_converge() {
        let store = MemoryStore::new();
        let realm_id = RealmId::new();
        store.create_realm(&realm_id, &root_grant(realm_id)).await.unwrap();
        for _ in 0..3 {
            let entry_id = EntryId::new();
            store.insert_vlob_atom(&atom(realm_id, entry_id, 1, 1, 10)).await.unwrap();
            store.insert_vlob_atom(&atom(realm_id, entry_id, 1, 2, 20)).await.unwrap();
        }

        let mut status = RealmStatus::initial();
        status = status.start_reencryption(2, device("alice@dev1"), Timestamp::from_millis(50));
        store.start_reencryption(&realm_id, &status).await.unwrap();
        assert_eq!(store.count_items_at_revision(&realm_id, 2).await.unwrap(), Some(0));

        let batch = store.get_reencryption_batch(&realm_id, 2, 4).await.unwrap();
        assert_eq!(batch.len(), 4);
        let (total, done) = store.save_reencryption_batch(&realm_id, 2, &batch).await.unwrap();
        assert_eq!((total, done), (6, 4));

        let rest = store.get_reencryption_batch(&realm_id, 2, 100).await.unwrap();
        assert_eq!(rest.len(), 2);
        let (total, done) = store.save_reencryption_batch(&realm_id, 2, &rest).await.unwrap();
        assert_eq!((total, done), (6, 6));
        assert!(store.get_reencryption_batch(&realm_id, 2, 100).await.unwrap().is_empty());

        let item = &batch[0];
        let copied = store
            .read_vlob_atom(&item.entry_id, 2, Some(item.version), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(copied.encryption_revision, 2);
        assert_eq!(copied.author, device("alice@dev1"));
    }

    #[tokio::test]
    async fn test_blocks_and_stats() {
        let store = MemoryStore::new();
        let realm_id = RealmId::new();
        store.create_realm(&realm_id, &root_grant(realm_id)).await.unwrap();

        let block = StoredBlock {
            block_id: BlockId::new(),
            realm_id,
            author: device("alice@dev1"),
            created_on: Timestamp::from_millis(1),
            data: vec![0; 100],
        };
        store.create_block(&block).await.unwrap();
        assert!(matches!(
            store.create_block(&block).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(store.read_block(&block.block_id).await.unwrap(), Some(block));

        store
            .insert_vlob_atom(&atom(realm_id, EntryId::new(), 1, 1, 10))
            .await
            .unwrap();
        let stats = store.get_realm_stats(&realm_id).await.unwrap();
        assert_eq!(stats.blocks_size, 100);
        assert_eq!(stats.vlobs_size, 4);
    }

    #[tokio::test]
    async fn test_messages_offset() {
        let store = MemoryStore::new();
        let bob: UserId = "bob".parse().unwrap();
        for i in 0..3u8 {
            store
                .push_message(
                    &bob,
                    &StoredMessage {
                        sender: device("alice@dev1"),
                        timestamp: Timestamp::from_millis(i as i64),
                        body: vec![i],
                    },
                )
                .await
                .unwrap();
        }
        let messages = store.get_messages(&bob, 1).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, vec![1]);
        assert!(store.get_messages(&"carol".parse().unwrap(), 0).await.unwrap().is_empty());
    }
}
