//! # Coffer Permissions
//!
//! Encryption, realm role rules, and identity verification.
//!
//! ## Overview
//!
//! - **Roles**: a realm's role log is append-only. [`RoleLog`] replays it to
//!   answer "what role does this user hold now" and "what role did this user
//!   hold at that instant".
//! - **Authorization tiers**: changes touching `OWNER` or `MANAGER` need an
//!   owner; other changes accept a manager ([`required_tier`]).
//! - **Trustchain**: [`TrustchainVerifier`] proves a device's identity by
//!   verifying every certificate up to the organization root key.
//!
//! ## Encryption Model
//!
//! 1. **Workspace key**: a [`SecretKey`] (ChaCha20-Poly1305) per realm
//!    encryption revision encrypts manifests and blocks.
//! 2. **Re-key messages**: on reencryption the new workspace key is sealed
//!    to each participant via X25519 ECDH ([`RekeyMessage`]).

pub mod authorization;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod manifest;
pub mod rekey;
pub mod roles;
pub mod trustchain;

pub use authorization::{can_update_role, required_tier, RequiredTier};
pub use crypto::{EncryptionNonce, EphemeralKeyPair, PrivateKey, PublicKey, SecretKey, SharedKey};
pub use envelope::{EncryptedBlob, EncryptionFormat};
pub use error::{PermsError, Result, TrustchainError};
pub use manifest::RemoteManifest;
pub use rekey::RekeyMessage;
pub use roles::RoleLog;
pub use trustchain::{
    collect_trustchain, verify_trustchain, CertificateSource, CollectedTrustchain,
    TrustchainBundle, TrustchainVerifier, UserRecord, VerifiedDevice, VerifiedTrustchain,
    VerifiedUser,
};
