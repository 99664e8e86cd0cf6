//! Per-user message inboxes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use coffer_core::{DeviceId, Timestamp, UserId};
use coffer_store::{DirectoryStore, StoredMessage};

use crate::error::MessageError;
use crate::events::{BackendEvent, EventBus};

type Result<T> = std::result::Result<T, MessageError>;

/// Delivery of opaque payloads to a user's inbox.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(
        &self,
        sender: &DeviceId,
        recipient: &UserId,
        timestamp: Timestamp,
        body: Vec<u8>,
    ) -> Result<()>;
}

/// Append-only inboxes backed by the directory store.
pub struct MessageComponent {
    store: Arc<dyn DirectoryStore>,
    events: EventBus,
}

impl MessageComponent {
    pub fn new(store: Arc<dyn DirectoryStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Messages of `recipient` from index `offset` onwards, with their index.
    pub async fn get(
        &self,
        recipient: &UserId,
        offset: usize,
    ) -> Result<Vec<(usize, StoredMessage)>> {
        let messages = self.store.get_messages(recipient, offset).await?;
        Ok(messages
            .into_iter()
            .enumerate()
            .map(|(i, message)| (offset + i, message))
            .collect())
    }
}

#[async_trait]
impl MessageSink for MessageComponent {
    async fn send(
        &self,
        sender: &DeviceId,
        recipient: &UserId,
        timestamp: Timestamp,
        body: Vec<u8>,
    ) -> Result<()> {
        if self.store.get_user(recipient).await?.is_none() {
            return Err(MessageError::UnknownRecipient(recipient.clone()));
        }
        let message = StoredMessage {
            sender: sender.clone(),
            timestamp,
            body,
        };
        self.store.push_message(recipient, &message).await?;
        // The new message is the last one of the inbox.
        let index = self.store.get_messages(recipient, 0).await?.len().saturating_sub(1);
        debug!(sender = %sender, recipient = %recipient, index, "message delivered");
        self.events.publish(BackendEvent::MessageReceived {
            author: sender.clone(),
            recipient: recipient.clone(),
            index,
        });
        Ok(())
    }
}
