//! Signed identity and role certificates.
//!
//! Every certificate is a canonical CBOR map with integer keys:
//!
//! | Key | Field |
//! |-----|-------|
//! | 0 | kind |
//! | 1 | author device id, or null for root-signed certificates |
//! | 2 | timestamp (ms) |
//! | 3.. | kind-specific fields |
//!
//! Certificates travel as signed blobs (`signature || content`). A null
//! author means the certificate was signed by the organization root key.

use ciborium::value::Value;

use crate::canonical::{decode_fields, encode_fields, opt_text_value, Fields};
use crate::crypto::{split_signed, SigningKey, VerifyKey};
use crate::error::{CoreError, Result};
use crate::realm::RealmRole;
use crate::types::{DeviceId, RealmId, Timestamp, UserId, UserProfile};

const KEY_KIND: u64 = 0;
const KEY_AUTHOR: u64 = 1;
const KEY_TIMESTAMP: u64 = 2;

/// Discriminator stored under key 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CertificateKind {
    User = 1,
    Device = 2,
    RevokedUser = 3,
    RealmRole = 0x10,
}

/// Behavior shared by all certificate types.
pub trait Certificate: Sized {
    const KIND: CertificateKind;

    fn author(&self) -> Option<&DeviceId>;

    fn timestamp(&self) -> Timestamp;

    /// Fields under keys 3 and above.
    fn specific_fields(&self) -> Vec<(u64, Value)>;

    fn from_fields(author: Option<DeviceId>, timestamp: Timestamp, fields: &Fields) -> Result<Self>;

    /// Canonical bytes of the certificate.
    fn dump(&self) -> Vec<u8> {
        let mut fields = vec![
            (KEY_KIND, Value::Integer((Self::KIND as u8).into())),
            (
                KEY_AUTHOR,
                opt_text_value(self.author().map(|a| a.to_string())),
            ),
            (
                KEY_TIMESTAMP,
                Value::Integer(self.timestamp().as_millis().into()),
            ),
        ];
        fields.extend(self.specific_fields());
        encode_fields(fields)
    }

    fn dump_and_sign(&self, key: &SigningKey) -> Vec<u8> {
        key.sign_blob(&self.dump())
    }

    /// Parse canonical bytes produced by [`Certificate::dump`].
    fn load(content: &[u8]) -> Result<Self> {
        let fields = decode_fields(content)?;
        let kind = fields.uint(KEY_KIND)?;
        if kind != Self::KIND as u64 {
            return Err(CoreError::UnexpectedKind {
                expected: Self::KIND as u64,
                got: kind,
            });
        }
        let author = fields
            .opt_text(KEY_AUTHOR)?
            .map(str::parse::<DeviceId>)
            .transpose()?;
        let timestamp = Timestamp::from_millis(fields.int(KEY_TIMESTAMP)?);
        Self::from_fields(author, timestamp, &fields)
    }

    /// Parse a signed blob without checking the signature.
    fn unsecure_load(signed: &[u8]) -> Result<Self> {
        let (_, content) = split_signed(signed)?;
        Self::load(content)
    }

    /// Check the signature with `author_verify_key`, then check that the
    /// certificate claims `expected_author` (`None` for root-signed).
    fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: Option<&DeviceId>,
    ) -> Result<Self> {
        let content = author_verify_key.verify_blob(signed)?;
        let certif = Self::load(content)?;
        if certif.author() != expected_author {
            return Err(CoreError::UnexpectedAuthor {
                expected: display_author(expected_author),
                got: display_author(certif.author()),
            });
        }
        Ok(certif)
    }
}

fn display_author(author: Option<&DeviceId>) -> String {
    match author {
        Some(a) => a.to_string(),
        None => "<root>".to_string(),
    }
}

fn required_author(author: Option<DeviceId>) -> Result<DeviceId> {
    author.ok_or_else(|| CoreError::MalformedCertificate("missing author".into()))
}

/// Certifies a user's existence, encryption public key and profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCertificate {
    pub author: Option<DeviceId>,
    pub timestamp: Timestamp,
    pub user_id: UserId,
    /// X25519 public key used to seal messages to this user.
    pub public_key: [u8; 32],
    pub profile: UserProfile,
}

impl Certificate for UserCertificate {
    const KIND: CertificateKind = CertificateKind::User;

    fn author(&self) -> Option<&DeviceId> {
        self.author.as_ref()
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn specific_fields(&self) -> Vec<(u64, Value)> {
        vec![
            (3, Value::Text(self.user_id.to_string())),
            (4, Value::Bytes(self.public_key.to_vec())),
            (5, Value::Integer(self.profile.as_u8().into())),
        ]
    }

    fn from_fields(author: Option<DeviceId>, timestamp: Timestamp, fields: &Fields) -> Result<Self> {
        let profile = u8::try_from(fields.uint(5)?)
            .ok()
            .and_then(UserProfile::from_u8)
            .ok_or_else(|| CoreError::MalformedCertificate("unknown profile".into()))?;
        Ok(Self {
            author,
            timestamp,
            user_id: fields.text(3)?.parse()?,
            public_key: fields.byte_array(4)?,
            profile,
        })
    }
}

/// Certifies a device and its signing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCertificate {
    pub author: Option<DeviceId>,
    pub timestamp: Timestamp,
    pub device_id: DeviceId,
    pub verify_key: VerifyKey,
}

impl Certificate for DeviceCertificate {
    const KIND: CertificateKind = CertificateKind::Device;

    fn author(&self) -> Option<&DeviceId> {
        self.author.as_ref()
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn specific_fields(&self) -> Vec<(u64, Value)> {
        vec![
            (3, Value::Text(self.device_id.to_string())),
            (4, Value::Bytes(self.verify_key.as_bytes().to_vec())),
        ]
    }

    fn from_fields(author: Option<DeviceId>, timestamp: Timestamp, fields: &Fields) -> Result<Self> {
        Ok(Self {
            author,
            timestamp,
            device_id: fields.text(3)?.parse()?,
            verify_key: VerifyKey::from_bytes(fields.byte_array(4)?),
        })
    }
}

/// Revokes a user. Always issued by a device, never by the root key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedUserCertificate {
    pub author: DeviceId,
    pub timestamp: Timestamp,
    pub user_id: UserId,
}

impl Certificate for RevokedUserCertificate {
    const KIND: CertificateKind = CertificateKind::RevokedUser;

    fn author(&self) -> Option<&DeviceId> {
        Some(&self.author)
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn specific_fields(&self) -> Vec<(u64, Value)> {
        vec![(3, Value::Text(self.user_id.to_string()))]
    }

    fn from_fields(author: Option<DeviceId>, timestamp: Timestamp, fields: &Fields) -> Result<Self> {
        Ok(Self {
            author: required_author(author)?,
            timestamp,
            user_id: fields.text(3)?.parse()?,
        })
    }
}

/// Grants (`role = Some`) or revokes (`role = None`) a user's role on a realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmRoleCertificate {
    pub author: Option<DeviceId>,
    pub timestamp: Timestamp,
    pub realm_id: RealmId,
    pub user_id: UserId,
    pub role: Option<RealmRole>,
}

impl RealmRoleCertificate {
    /// The self-signed OWNER grant that creates a realm.
    pub fn build_realm_root_certif(
        author: DeviceId,
        timestamp: Timestamp,
        realm_id: RealmId,
    ) -> Self {
        Self {
            user_id: author.user_id().clone(),
            author: Some(author),
            timestamp,
            realm_id,
            role: Some(RealmRole::Owner),
        }
    }
}

impl Certificate for RealmRoleCertificate {
    const KIND: CertificateKind = CertificateKind::RealmRole;

    fn author(&self) -> Option<&DeviceId> {
        self.author.as_ref()
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn specific_fields(&self) -> Vec<(u64, Value)> {
        let role = match self.role {
            Some(role) => Value::Integer(role.as_u8().into()),
            None => Value::Null,
        };
        vec![
            (3, Value::Bytes(self.realm_id.as_bytes().to_vec())),
            (4, Value::Text(self.user_id.to_string())),
            (5, role),
        ]
    }

    fn from_fields(author: Option<DeviceId>, timestamp: Timestamp, fields: &Fields) -> Result<Self> {
        let role = match fields.opt_uint(5)? {
            None => None,
            Some(v) => Some(
                u8::try_from(v)
                    .ok()
                    .and_then(RealmRole::from_u8)
                    .ok_or_else(|| CoreError::MalformedCertificate("unknown role".into()))?,
            ),
        };
        Ok(Self {
            author,
            timestamp,
            realm_id: RealmId::from_bytes(fields.byte_array(3)?),
            user_id: fields.text(4)?.parse()?,
            role,
        })
    }
}
