//! Immutable encrypted blocks.

use std::sync::Arc;

use tracing::debug;

use coffer_core::{BlockId, DeviceId, RealmId, RealmRole, Timestamp};
use coffer_store::{RealmStore, StoreError, StoredBlock};

use crate::error::BlockError;
use crate::realm::load_role_log;

type Result<T> = std::result::Result<T, BlockError>;

pub struct BlockComponent {
    store: Arc<dyn RealmStore>,
}

impl BlockComponent {
    pub fn new(store: Arc<dyn RealmStore>) -> Self {
        Self { store }
    }

    async fn role_of(&self, author: &DeviceId, realm_id: &RealmId) -> Result<Option<RealmRole>> {
        Ok(load_role_log(self.store.as_ref(), realm_id)
            .await?
            .role_of(author.user_id()))
    }

    /// Store a block. Contributors and above, outside maintenance.
    pub async fn create(
        &self,
        author: &DeviceId,
        block_id: &BlockId,
        realm_id: &RealmId,
        data: Vec<u8>,
    ) -> Result<()> {
        let status = self
            .store
            .get_realm_status(realm_id)
            .await?
            .ok_or_else(|| BlockError::NotFound(format!("realm `{}` doesn't exist", realm_id)))?;
        if !self.role_of(author, realm_id).await?.map_or(false, RealmRole::can_write) {
            return Err(BlockError::NotAllowed(format!(
                "`{}` cannot write realm `{}`",
                author, realm_id
            )));
        }
        if status.in_maintenance() {
            return Err(BlockError::InMaintenance(*realm_id));
        }

        let block = StoredBlock {
            block_id: *block_id,
            realm_id: *realm_id,
            author: author.clone(),
            created_on: Timestamp::now(),
            data,
        };
        self.store.create_block(&block).await.map_err(|e| match e {
            StoreError::AlreadyExists(_) => BlockError::AlreadyExists(*block_id),
            e => e.into(),
        })?;
        debug!(realm_id = %realm_id, block_id = %block_id, size = block.data.len(), "block created");
        Ok(())
    }

    /// Read a block. Any role holder, maintenance or not.
    pub async fn read(&self, author: &DeviceId, block_id: &BlockId) -> Result<Vec<u8>> {
        let block = self
            .store
            .read_block(block_id)
            .await?
            .ok_or_else(|| BlockError::NotFound(format!("block `{}` doesn't exist", block_id)))?;
        if self.role_of(author, &block.realm_id).await?.is_none() {
            return Err(BlockError::NotAllowed(format!(
                "`{}` cannot read realm `{}`",
                author, block.realm_id
            )));
        }
        Ok(block.data)
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

    #[tokio::test]
    async fn test_block_access() {
        let store = Arc::new(MemoryStore::new());
        let realm_id = RealmId::from_bytes([5; 16]);
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
        let blocks = BlockComponent::new(store.clone());
        let block_id = BlockId::new();

        assert!(matches!(
            blocks.create(&device("bob"), &block_id, &realm_id, b"data".to_vec()).await,
            Err(BlockError::NotAllowed(_))
        ));
        assert!(matches!(
            blocks.read(&device("bob"), &block_id).await,
            Err(BlockError::NotFound(_))
        ));
        blocks
            .create(&device("alice"), &block_id, &realm_id, b"data".to_vec())
            .await
            .unwrap();
        assert!(matches!(
            blocks.create(&device("alice"), &block_id, &realm_id, b"data".to_vec()).await,
            Err(BlockError::AlreadyExists(_))
        ));
        assert_eq!(blocks.read(&device("bob"), &block_id).await.unwrap(), b"data".to_vec());
        assert!(matches!(
            blocks.read(&device("mallory"), &block_id).await,
            Err(BlockError::NotAllowed(_))
        ));

        let status = store.get_realm_status(&realm_id).await.unwrap().unwrap();
        let status = status.start_reencryption(2, device("alice"), Timestamp::from_millis(3));
        store.start_reencryption(&realm_id, &status).await.unwrap();
        assert!(matches!(
            blocks.create(&device("alice"), &BlockId::new(), &realm_id, vec![]).await,
            Err(BlockError::InMaintenance(_))
        ));
        assert_eq!(blocks.read(&device("alice"), &block_id).await.unwrap(), b"data".to_vec());
    }
}
