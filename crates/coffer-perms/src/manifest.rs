//! Signed and encrypted remote manifests.
//!
//! A manifest version is stored remotely as a vlob:
//! `encrypt(workspace_key, sign(author_key, canonical_cbor(manifest)))`.
//! The manifest body itself is opaque here.

use ciborium::value::Value;

use coffer_core::canonical::{decode_fields, encode_fields};
use coffer_core::{DeviceId, EntryId, SigningKey, Timestamp, VerifyKey};

use crate::crypto::SecretKey;
use crate::error::{PermsError, Result};

/// One version of an entry, as the author wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteManifest {
    pub entry_id: EntryId,
    pub version: u64,
    pub author: DeviceId,
    pub timestamp: Timestamp,
    pub content: Vec<u8>,
}

impl RemoteManifest {
    /// Canonical bytes.
    pub fn dump(&self) -> Vec<u8> {
        encode_fields(vec![
            (0, Value::Bytes(self.entry_id.as_bytes().to_vec())),
            (1, Value::Integer(self.version.into())),
            (2, Value::Text(self.author.to_string())),
            (3, Value::Integer(self.timestamp.as_millis().into())),
            (4, Value::Bytes(self.content.clone())),
        ])
    }

    pub fn load(content: &[u8]) -> Result<Self> {
        let fields = decode_fields(content)?;
        Ok(Self {
            entry_id: EntryId::from_bytes(fields.byte_array(0)?),
            version: fields.uint(1)?,
            author: fields.text(2)?.parse()?,
            timestamp: Timestamp::from_millis(fields.int(3)?),
            content: fields.bytes(4)?.to_vec(),
        })
    }

    pub fn dump_sign_and_encrypt(&self, author_key: &SigningKey, key: &SecretKey) -> Result<Vec<u8>> {
        key.encrypt(&author_key.sign_blob(&self.dump()))
    }

    /// Decrypt `blob`, verify it with the author's key, and check the claimed
    /// author and timestamp against what the server reported.
    pub fn decrypt_verify_and_load(
        blob: &[u8],
        key: &SecretKey,
        author_verify_key: &VerifyKey,
        expected_author: &DeviceId,
        expected_timestamp: Timestamp,
    ) -> Result<Self> {
        let signed = key.decrypt(blob)?;
        let content = author_verify_key.verify_blob(&signed)?;
        let manifest = Self::load(content)?;

        if &manifest.author != expected_author {
            return Err(PermsError::InvalidManifest(format!(
                "author mismatch: expected {}, got {}",
                expected_author, manifest.author
            )));
        }
        if manifest.timestamp != expected_timestamp {
            return Err(PermsError::InvalidManifest(format!(
                "timestamp mismatch: expected {}, got {}",
                expected_timestamp, manifest.timestamp
            )));
        }
        Ok(manifest)
    }
}
