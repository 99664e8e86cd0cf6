//! # Coffer Core
//!
//! Pure primitives for coffer: identifiers, signing keys, canonical
//! encoding and signed certificates.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`RealmId`], [`EntryId`], [`BlockId`] - Opaque 16-byte identifiers
//! - [`DeviceId`] - `user@device` identity of a signing device
//! - [`RealmRoleCertificate`] - Signed grant or revocation of a realm role
//! - [`UserCertificate`], [`DeviceCertificate`], [`RevokedUserCertificate`] -
//!   The links of a trustchain
//!
//! ## Canonicalization
//!
//! Certificates are encoded using deterministic CBOR. See [`canonical`] module.

pub mod canonical;
pub mod certificate;
pub mod crypto;
pub mod error;
pub mod realm;
pub mod types;
pub mod validation;

pub use certificate::{
    Certificate, CertificateKind, DeviceCertificate, RealmRoleCertificate,
    RevokedUserCertificate, UserCertificate,
};
pub use crypto::{HashDigest, Signature, SigningKey, VerifyKey};
pub use error::{CoreError, ValidationError};
pub use realm::{MaintenanceType, RealmRole, RealmStatus, RoleGrant};
pub use types::{BlockId, DeviceId, EntryId, OrganizationId, RealmId, Timestamp, UserId, UserProfile};
pub use validation::{
    validate_realm_root_certificate, validate_role_update_certificate, validate_timestamp,
    DEFAULT_BALLPARK_MS,
};
