//! Re-key messages sealed to each realm participant.
//!
//! When a realm owner starts a reencryption, every participant receives the
//! new workspace key sealed to their X25519 public key (ephemeral ECDH +
//! ChaCha20-Poly1305).

use serde::{Deserialize, Serialize};

use coffer_core::RealmId;

use crate::crypto::{EncryptionNonce, EphemeralKeyPair, PrivateKey, PublicKey, SecretKey};
use crate::error::{PermsError, Result};

/// Clear-text content of a re-key message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyMessage {
    pub realm_id: RealmId,
    pub encryption_revision: u64,
    pub key: SecretKey,
}

/// On-wire form of a sealed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedBox {
    ephemeral_public: PublicKey,
    nonce: EncryptionNonce,
    ciphertext: Vec<u8>,
}

impl RekeyMessage {
    pub fn new(realm_id: RealmId, encryption_revision: u64, key: SecretKey) -> Self {
        Self {
            realm_id,
            encryption_revision,
            key,
        }
    }

    /// Seal for `recipient`.
    pub fn seal(&self, recipient: &PublicKey) -> Result<Vec<u8>> {
        let mut plaintext = Vec::new();
        ciborium::into_writer(self, &mut plaintext)
            .map_err(|e| PermsError::SerializationError(e.to_string()))?;

        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let wrap_key = ephemeral
            .diffie_hellman(recipient)
            .derive_secret_key(recipient.as_bytes());

        let nonce = EncryptionNonce::generate();
        let ciphertext = wrap_key.encrypt_with_nonce(&plaintext, &nonce)?;

        let mut buf = Vec::new();
        ciborium::into_writer(
            &SealedBox {
                ephemeral_public,
                nonce,
                ciphertext,
            },
            &mut buf,
        )
        .map_err(|e| PermsError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Open a message sealed to the owner of `recipient_secret`.
    pub fn open(sealed: &[u8], recipient_secret: &PrivateKey) -> Result<Self> {
        let sealed: SealedBox = ciborium::from_reader(sealed)
            .map_err(|e| PermsError::SerializationError(e.to_string()))?;

        let wrap_key = recipient_secret
            .diffie_hellman(&sealed.ephemeral_public)
            .derive_secret_key(recipient_secret.public_key().as_bytes());
        let plaintext = wrap_key.decrypt_with_nonce(&sealed.ciphertext, &sealed.nonce)?;

        ciborium::from_reader(plaintext.as_slice())
            .map_err(|e| PermsError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let recipient = PrivateKey::generate();
        let message = RekeyMessage::new(RealmId::new(), 2, SecretKey::generate());

        let sealed = message.seal(&recipient.public_key()).unwrap();
        let opened = RekeyMessage::open(&sealed, &recipient).unwrap();

        assert_eq!(opened, message);
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let recipient = PrivateKey::generate();
        let message = RekeyMessage::new(RealmId::new(), 3, SecretKey::generate());
        let sealed = message.seal(&recipient.public_key()).unwrap();

        assert!(matches!(
            RekeyMessage::open(&sealed, &PrivateKey::generate()),
            Err(PermsError::DecryptionError(_))
        ));
    }
}
