//! Encrypted blob envelope.
//!
//! Vlob and block contents travel wrapped in an [`EncryptedBlob`] that
//! carries the ciphertext and the metadata needed to decrypt it.

use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptionNonce, SecretKey};
use crate::error::{PermsError, Result};

/// Format identifier for encrypted blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncryptionFormat {
    /// ChaCha20-Poly1305 with 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// An encrypted blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub format: EncryptionFormat,

    /// Unique per encryption.
    pub nonce: EncryptionNonce,

    /// Includes the authentication tag.
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    pub fn seal(plaintext: &[u8], key: &SecretKey) -> Result<Self> {
        let nonce = EncryptionNonce::generate();
        let ciphertext = key.encrypt_with_nonce(plaintext, &nonce)?;
        Ok(Self {
            format: EncryptionFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    pub fn open(&self, key: &SecretKey) -> Result<Vec<u8>> {
        match self.format {
            EncryptionFormat::ChaCha20Poly1305 => {
                key.decrypt_with_nonce(&self.ciphertext, &self.nonce)
            }
        }
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PermsError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| PermsError::SerializationError(e.to_string()))
    }
}

impl SecretKey {
    /// Encrypt into serialized [`EncryptedBlob`] bytes.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        EncryptedBlob::seal(plaintext, self)?.to_bytes()
    }

    /// Decrypt serialized [`EncryptedBlob`] bytes.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        EncryptedBlob::from_bytes(blob)?.open(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = SecretKey::generate();
        let blob = EncryptedBlob::seal(b"hello, encrypted world!", &key).unwrap();
        assert_eq!(blob.open(&key).unwrap(), b"hello, encrypted world!");
    }

    #[test]
    fn test_encrypt_decrypt_bytes() {
        let key = SecretKey::generate();
        let bytes = key.encrypt(b"block data").unwrap();
        assert_eq!(key.decrypt(&bytes).unwrap(), b"block data");
    }

    #[test]
    fn test_nonce_is_fresh() {
        let key = SecretKey::generate();
        assert_ne!(key.encrypt(b"same").unwrap(), key.encrypt(b"same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let bytes = SecretKey::generate().encrypt(b"secret").unwrap();
        assert!(matches!(
            SecretKey::generate().decrypt(&bytes),
            Err(PermsError::DecryptionError(_))
        ));
    }

    #[test]
    fn test_garbage_fails() {
        assert!(matches!(
            SecretKey::generate().decrypt(b"not cbor at all"),
            Err(PermsError::SerializationError(_))
        ));
    }
}
