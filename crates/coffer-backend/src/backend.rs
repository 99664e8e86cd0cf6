//! The Backend: every server component wired onto one store.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use coffer_core::{DeviceId, VerifyKey};
use coffer_store::{DirectoryStore, MemoryStore, RealmStore, SqliteStore};

use crate::block::BlockComponent;
use crate::cmds::AuthenticatedCmds;
use crate::config::{BackendConfig, DbConfig};
use crate::error::Result;
use crate::events::{BackendEvent, EventBus};
use crate::locks::RealmLocks;
use crate::message::MessageComponent;
use crate::realm::RealmComponent;
use crate::user::UserComponent;
use crate::vlob::VlobComponent;

/// An organization's backend.
///
/// Components share the store, the per-realm locks and the event bus.
/// Devices talk to it through [`AuthenticatedCmds`].
pub struct Backend {
    config: BackendConfig,
    root_verify_key: VerifyKey,
    events: EventBus,
    user: UserComponent,
    realm: RealmComponent,
    vlob: VlobComponent,
    block: BlockComponent,
    message: Arc<MessageComponent>,
}

impl Backend {
    /// Open the store selected by `config.db` and build the components.
    pub fn open(config: BackendConfig, root_verify_key: VerifyKey) -> Result<Arc<Self>> {
        let backend = match &config.db {
            DbConfig::Mocked => {
                Self::with_store(config.clone(), root_verify_key, Arc::new(MemoryStore::new()))
            }
            DbConfig::Sqlite { path } => {
                let store = if path.as_os_str() == ":memory:" {
                    SqliteStore::open_memory()?
                } else {
                    SqliteStore::open(path)?
                };
                Self::with_store(config.clone(), root_verify_key, Arc::new(store))
            }
        };
        info!(db = ?config.db, "backend ready");
        Ok(backend)
    }

    /// Build the components on an already opened store.
    pub fn with_store<S>(config: BackendConfig, root_verify_key: VerifyKey, store: Arc<S>) -> Arc<Self>
    where
        S: RealmStore + DirectoryStore + 'static,
    {
        let events = EventBus::new(config.event_capacity);
        let locks = Arc::new(RealmLocks::new());
        let message = Arc::new(MessageComponent::new(store.clone(), events.clone()));
        Arc::new(Self {
            user: UserComponent::new(store.clone()),
            realm: RealmComponent::new(
                store.clone(),
                store.clone(),
                message.clone(),
                events.clone(),
                locks.clone(),
            ),
            vlob: VlobComponent::new(store.clone(), locks),
            block: BlockComponent::new(store),
            message,
            events,
            root_verify_key,
            config,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Verify key of the organization root, ending every trustchain.
    pub fn root_verify_key(&self) -> &VerifyKey {
        &self.root_verify_key
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }

    pub fn user(&self) -> &UserComponent {
        &self.user
    }

    pub fn realm(&self) -> &RealmComponent {
        &self.realm
    }

    pub fn vlob(&self) -> &VlobComponent {
        &self.vlob
    }

    pub fn block(&self) -> &BlockComponent {
        &self.block
    }

    pub fn message(&self) -> &MessageComponent {
        &self.message
    }

    /// Commands issued as `device_id`, which must be registered.
    pub async fn connect(self: &Arc<Self>, device_id: &DeviceId) -> Result<AuthenticatedCmds> {
        AuthenticatedCmds::connect(self.clone(), device_id).await
    }
}
