//! Local cache contract consumed by the remote loader.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use coffer_core::{BlockId, EntryId};
use coffer_perms::RemoteManifest;

use crate::error::Result;

/// Local storage of a workspace's manifests and blocks.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    /// Cached base manifest, `None` on miss.
    async fn get_manifest(&self, entry_id: &EntryId) -> Result<Option<RemoteManifest>>;

    async fn set_manifest(&self, entry_id: &EntryId, manifest: RemoteManifest) -> Result<()>;

    /// Block content, dirty chunks taking precedence over clean blocks.
    async fn get_block(&self, block_id: &BlockId) -> Result<Option<Vec<u8>>>;

    /// Record a block known to match the remote one.
    async fn set_clean_block(&self, block_id: &BlockId, data: Vec<u8>) -> Result<()>;

    /// Drop the dirty chunk with the same id. Missing chunks are ignored.
    async fn clear_chunk(&self, block_id: &BlockId) -> Result<()>;
}

/// In-memory local storage.
#[derive(Debug, Default)]
pub struct MemoryLocalStorage {
    manifests: RwLock<HashMap<EntryId, RemoteManifest>>,
    clean_blocks: RwLock<HashMap<BlockId, Vec<u8>>>,
    dirty_chunks: RwLock<HashMap<BlockId, Vec<u8>>>,
}

impl MemoryLocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record locally written data not uploaded yet.
    pub async fn set_dirty_chunk(&self, block_id: &BlockId, data: Vec<u8>) {
        self.dirty_chunks.write().await.insert(*block_id, data);
    }

    pub async fn is_dirty(&self, block_id: &BlockId) -> bool {
        self.dirty_chunks.read().await.contains_key(block_id)
    }
}

#[async_trait]
impl LocalStorage for MemoryLocalStorage {
    async fn get_manifest(&self, entry_id: &EntryId) -> Result<Option<RemoteManifest>> {
        Ok(self.manifests.read().await.get(entry_id).cloned())
    }

    async fn set_manifest(&self, entry_id: &EntryId, manifest: RemoteManifest) -> Result<()> {
        self.manifests.write().await.insert(*entry_id, manifest);
        Ok(())
    }

    async fn get_block(&self, block_id: &BlockId) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.dirty_chunks.read().await.get(block_id) {
            return Ok(Some(data.clone()));
        }
        Ok(self.clean_blocks.read().await.get(block_id).cloned())
    }

    async fn set_clean_block(&self, block_id: &BlockId, data: Vec<u8>) -> Result<()> {
        self.clean_blocks.write().await.insert(*block_id, data);
        Ok(())
    }

    async fn clear_chunk(&self, block_id: &BlockId) -> Result<()> {
        self.dirty_chunks.write().await.remove(block_id);
        Ok(())
    }
}
