//! Backend notifications.
//!
//! Components publish on an [`EventBus`] handed to them at construction.
//! Publishing never blocks and never fails: events with no subscriber are
//! dropped.

use tokio::sync::broadcast;
use tracing::trace;

use coffer_core::{DeviceId, RealmId, RealmRole, UserId};

/// Something that happened on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    RealmRolesUpdated {
        author: DeviceId,
        realm_id: RealmId,
        user_id: UserId,
        role: Option<RealmRole>,
    },
    RealmMaintenanceStarted {
        author: DeviceId,
        realm_id: RealmId,
        encryption_revision: u64,
    },
    RealmMaintenanceFinished {
        author: DeviceId,
        realm_id: RealmId,
        encryption_revision: u64,
    },
    MessageReceived {
        author: DeviceId,
        recipient: UserId,
        index: usize,
    },
}

impl BackendEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RealmRolesUpdated { .. } => "realm.roles_updated",
            Self::RealmMaintenanceStarted { .. } => "realm.maintenance_started",
            Self::RealmMaintenanceFinished { .. } => "realm.maintenance_finished",
            Self::MessageReceived { .. } => "message.received",
        }
    }
}

/// Fan-out channel of [`BackendEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BackendEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: BackendEvent) {
        trace!(event = event.name(), "publishing event");
        // An error only means nobody listens.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.sender.subscribe()
    }
}
