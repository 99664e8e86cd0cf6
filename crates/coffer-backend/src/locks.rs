//! Per-realm critical sections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use coffer_core::RealmId;

/// One exclusive lock per realm id.
///
/// Read-modify-write sequences on a realm (role updates, maintenance
/// transitions, vlob writes) run while holding the realm's guard. Different
/// realms never contend.
#[derive(Debug, Default)]
pub struct RealmLocks {
    locks: Mutex<HashMap<RealmId, Arc<Mutex<()>>>>,
}

impl RealmLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries nobody holds or waits on are dropped on the way, so the map
    /// only ever holds realms currently in use.
    pub async fn lock(&self, realm_id: &RealmId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(*realm_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
