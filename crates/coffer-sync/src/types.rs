//! Client-side key material and data references.

use coffer_core::{BlockId, DeviceId, HashDigest, RealmId, SigningKey};
use coffer_perms::{PrivateKey, PublicKey, SecretKey};

/// The device this client runs as.
#[derive(Debug, Clone)]
pub struct LocalDevice {
    pub device_id: DeviceId,
    pub signing_key: SigningKey,
    /// The user's X25519 key, opening messages sealed to the user.
    pub private_key: PrivateKey,
}

impl LocalDevice {
    pub fn new(device_id: DeviceId, signing_key: SigningKey, private_key: PrivateKey) -> Self {
        Self {
            device_id,
            signing_key,
            private_key,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }
}

/// A workspace as known by one of its participants: the realm and the key
/// of its current encryption revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceEntry {
    pub realm_id: RealmId,
    pub key: SecretKey,
    pub encryption_revision: u64,
}

impl WorkspaceEntry {
    /// A brand new workspace, at encryption revision 1.
    pub fn new(realm_id: RealmId) -> Self {
        Self {
            realm_id,
            key: SecretKey::generate(),
            encryption_revision: 1,
        }
    }

    /// The entry after one reencryption to `key`.
    pub fn rekeyed(&self, key: SecretKey) -> Self {
        Self {
            realm_id: self.realm_id,
            key,
            encryption_revision: self.encryption_revision + 1,
        }
    }
}

/// Everything needed to fetch and check one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAccess {
    pub id: BlockId,
    pub key: SecretKey,
    pub offset: u64,
    pub size: u64,
    /// Digest of the clear-text block.
    pub digest: HashDigest,
}

impl BlockAccess {
    /// A fresh access for `data`, with a new id and key.
    pub fn for_data(data: &[u8], offset: u64) -> Self {
        Self {
            id: BlockId::new(),
            key: SecretKey::generate(),
            offset,
            size: data.len() as u64,
            digest: HashDigest::hash(data),
        }
    }
}
