//! Trustchain resolution and verification.
//!
//! A device's identity is proven by a DAG of signed certificates: its own
//! device certificate, its user's certificate (and revocation, if any), and
//! transitively the certificates of every device that signed those. The DAG
//! bottoms out at certificates signed by the organization root key
//! (`author = None`).
//!
//! Resolution runs in two phases:
//!
//! 1. **Collect**: a worklist walk over `device -> author device`,
//!    `device -> user`, `user -> author device` and
//!    `revocation -> author device`, skipping nodes already visited.
//! 2. **Verify**: certificates are verified in dependency order. A
//!    certificate becomes verifiable once its author's device certificate is
//!    verified. A pass that verifies nothing means the chain is broken.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use coffer_core::{
    Certificate, DeviceCertificate, DeviceId, RevokedUserCertificate, Timestamp, UserCertificate,
    UserId, UserProfile, VerifyKey,
};

use crate::error::TrustchainError;

type Result<T> = std::result::Result<T, TrustchainError>;

/// Signed certificates of a user, as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_certificate: Vec<u8>,
    pub revoked_user_certificate: Option<Vec<u8>>,
}

/// Lookup of signed certificates by identity.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn fetch_user(&self, user_id: &UserId) -> Result<UserRecord>;

    async fn fetch_device(&self, device_id: &DeviceId) -> Result<Vec<u8>>;
}

/// Every signed certificate needed to verify a set of identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustchainBundle {
    pub users: Vec<Vec<u8>>,
    pub revoked_users: Vec<Vec<u8>>,
    pub devices: Vec<Vec<u8>>,
}

/// A device whose whole trustchain has been verified.
#[derive(Debug, Clone)]
pub struct VerifiedDevice {
    pub user: UserCertificate,
    pub revoked_user: Option<RevokedUserCertificate>,
    pub device: DeviceCertificate,
    pub trustchain: TrustchainBundle,
}

/// A user whose whole trustchain has been verified.
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    pub user: UserCertificate,
    pub revoked_user: Option<RevokedUserCertificate>,
    pub trustchain: TrustchainBundle,
}

impl VerifiedUser {
    /// Whether the user was revoked at or before `at`.
    pub fn is_revoked_at(&self, at: Timestamp) -> bool {
        self.revoked_user
            .as_ref()
            .map_or(false, |revoked| revoked.timestamp <= at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    User(UserId),
    Device(DeviceId),
}

fn invalid(msg: impl Into<String>) -> TrustchainError {
    TrustchainError::InvalidTrustchain(msg.into())
}

/// Fetched, not yet verified, certificates.
#[derive(Debug, Default)]
pub struct CollectedTrustchain {
    users: HashMap<UserId, UserRecord>,
    devices: HashMap<DeviceId, Vec<u8>>,
}

impl CollectedTrustchain {
    pub fn bundle(&self) -> TrustchainBundle {
        let mut bundle = TrustchainBundle::default();
        for record in self.users.values() {
            bundle.users.push(record.user_certificate.clone());
            if let Some(revoked) = &record.revoked_user_certificate {
                bundle.revoked_users.push(revoked.clone());
            }
        }
        bundle.devices.extend(self.devices.values().cloned());
        bundle
    }
}

/// Walk the certificate DAG from `users` and `devices`, fetching each node once.
pub async fn collect_trustchain<S: CertificateSource + ?Sized>(
    source: &S,
    users: &[UserId],
    devices: &[DeviceId],
) -> Result<CollectedTrustchain> {
    let mut collected = CollectedTrustchain::default();
    let mut visited = HashSet::new();
    let mut worklist: VecDeque<Node> = users
        .iter()
        .cloned()
        .map(Node::User)
        .chain(devices.iter().cloned().map(Node::Device))
        .collect();

    while let Some(node) = worklist.pop_front() {
        if !visited.insert(node.clone()) {
            continue;
        }
        match node {
            Node::Device(device_id) => {
                let signed = source.fetch_device(&device_id).await?;
                let certif = DeviceCertificate::unsecure_load(&signed)
                    .map_err(|e| invalid(format!("device `{}`: {}", device_id, e)))?;
                if certif.device_id != device_id {
                    return Err(invalid(format!(
                        "expected certificate of device `{}`, got `{}`",
                        device_id, certif.device_id
                    )));
                }
                worklist.push_back(Node::User(device_id.user_id().clone()));
                if let Some(author) = certif.author {
                    worklist.push_back(Node::Device(author));
                }
                collected.devices.insert(device_id, signed);
            }
            Node::User(user_id) => {
                let record = source.fetch_user(&user_id).await?;
                let certif = UserCertificate::unsecure_load(&record.user_certificate)
                    .map_err(|e| invalid(format!("user `{}`: {}", user_id, e)))?;
                if certif.user_id != user_id {
                    return Err(invalid(format!(
                        "expected certificate of user `{}`, got `{}`",
                        user_id, certif.user_id
                    )));
                }
                if let Some(author) = certif.author {
                    worklist.push_back(Node::Device(author));
                }
                if let Some(signed) = &record.revoked_user_certificate {
                    let revoked = RevokedUserCertificate::unsecure_load(signed)
                        .map_err(|e| invalid(format!("revoked user `{}`: {}", user_id, e)))?;
                    if revoked.user_id != user_id {
                        return Err(invalid(format!(
                            "expected revocation of user `{}`, got `{}`",
                            user_id, revoked.user_id
                        )));
                    }
                    worklist.push_back(Node::Device(revoked.author));
                }
                collected.users.insert(user_id, record);
            }
        }
    }

    Ok(collected)
}

/// Certificates whose signatures have all been checked.
#[derive(Debug, Default)]
pub struct VerifiedTrustchain {
    pub users: HashMap<UserId, UserCertificate>,
    pub revoked_users: HashMap<UserId, RevokedUserCertificate>,
    pub devices: HashMap<DeviceId, DeviceCertificate>,
}

enum Pending<'a> {
    User(&'a [u8], Option<DeviceId>),
    Revoked(&'a [u8], DeviceId),
    Device(&'a [u8], Option<DeviceId>),
}

impl Pending<'_> {
    fn author(&self) -> Option<&DeviceId> {
        match self {
            Pending::User(_, author) | Pending::Device(_, author) => author.as_ref(),
            Pending::Revoked(_, author) => Some(author),
        }
    }
}

/// Verify every collected certificate in dependency order.
pub fn verify_trustchain(
    root_verify_key: &VerifyKey,
    collected: &CollectedTrustchain,
) -> Result<VerifiedTrustchain> {
    let mut pending = Vec::new();
    for record in collected.users.values() {
        let author = UserCertificate::unsecure_load(&record.user_certificate)
            .map_err(|e| invalid(e.to_string()))?
            .author;
        pending.push(Pending::User(&record.user_certificate, author));
        if let Some(signed) = &record.revoked_user_certificate {
            let author = RevokedUserCertificate::unsecure_load(signed)
                .map_err(|e| invalid(e.to_string()))?
                .author;
            pending.push(Pending::Revoked(signed, author));
        }
    }
    for signed in collected.devices.values() {
        let author = DeviceCertificate::unsecure_load(signed)
            .map_err(|e| invalid(e.to_string()))?
            .author;
        pending.push(Pending::Device(signed, author));
    }

    let mut verified = VerifiedTrustchain::default();
    while !pending.is_empty() {
        let before = pending.len();
        let mut blocked = Vec::new();

        for item in pending {
            let key = match item.author() {
                None => Some(*root_verify_key),
                Some(author) => verified.devices.get(author).map(|device| device.verify_key),
            };
            let key = match key {
                Some(key) => key,
                None => {
                    blocked.push(item);
                    continue;
                }
            };
            let expected = item.author();
            match &item {
                Pending::User(signed, _) => {
                    let certif = UserCertificate::verify_and_load(signed, &key, expected)
                        .map_err(|e| invalid(format!("user certificate: {}", e)))?;
                    verified.users.insert(certif.user_id.clone(), certif);
                }
                Pending::Revoked(signed, _) => {
                    let certif = RevokedUserCertificate::verify_and_load(signed, &key, expected)
                        .map_err(|e| invalid(format!("revoked user certificate: {}", e)))?;
                    verified.revoked_users.insert(certif.user_id.clone(), certif);
                }
                Pending::Device(signed, _) => {
                    let certif = DeviceCertificate::verify_and_load(signed, &key, expected)
                        .map_err(|e| invalid(format!("device certificate: {}", e)))?;
                    verified.devices.insert(certif.device_id.clone(), certif);
                }
            }
        }

        if blocked.len() == before {
            return Err(invalid(format!(
                "{} certificate(s) do not chain up to the root key",
                before
            )));
        }
        pending = blocked;
    }

    check_certifiers(&verified)?;
    Ok(verified)
}

/// Certifiers must not have been revoked when signing, and users can only be
/// created or revoked by admins.
fn check_certifiers(verified: &VerifiedTrustchain) -> Result<()> {
    let check_not_revoked = |author: &DeviceId, timestamp: Timestamp, what: &str| {
        match verified.revoked_users.get(author.user_id()) {
            Some(revoked) if revoked.timestamp <= timestamp => Err(invalid(format!(
                "{} signed by revoked device `{}`",
                what, author
            ))),
            _ => Ok(()),
        }
    };
    let check_admin = |author: &DeviceId, what: &str| match verified.users.get(author.user_id()) {
        Some(user) if user.profile == UserProfile::Admin => Ok(()),
        _ => Err(invalid(format!(
            "{} signed by non-admin device `{}`",
            what, author
        ))),
    };

    for device in verified.devices.values() {
        if let Some(author) = &device.author {
            check_not_revoked(author, device.timestamp, "device certificate")?;
        }
    }
    for user in verified.users.values() {
        if let Some(author) = &user.author {
            check_not_revoked(author, user.timestamp, "user certificate")?;
            check_admin(author, "user certificate")?;
        }
    }
    for revoked in verified.revoked_users.values() {
        check_not_revoked(&revoked.author, revoked.timestamp, "revoked user certificate")?;
        check_admin(&revoked.author, "revoked user certificate")?;
    }
    Ok(())
}

/// Resolves and verifies identities, with a read-through certificate cache.
pub struct TrustchainVerifier<S> {
    source: S,
    root_verify_key: VerifyKey,
    users: RwLock<HashMap<UserId, UserRecord>>,
    devices: RwLock<HashMap<DeviceId, Vec<u8>>>,
}

impl<S: CertificateSource> TrustchainVerifier<S> {
    pub fn new(source: S, root_verify_key: VerifyKey) -> Self {
        Self {
            source,
            root_verify_key,
            users: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Resolve `device_id` and its trustchain.
    ///
    /// `no_cache` skips cached certificates; fresh ones are still cached.
    pub async fn resolve(&self, device_id: &DeviceId, no_cache: bool) -> Result<VerifiedDevice> {
        let cached = CachedSource {
            verifier: self,
            no_cache,
        };
        let collected = collect_trustchain(&cached, &[], std::slice::from_ref(device_id)).await?;
        let mut verified = self.verify(&collected)?;

        let device = verified
            .devices
            .remove(device_id)
            .ok_or_else(|| invalid(format!("device `{}` missing from trustchain", device_id)))?;
        let user = verified.users.remove(device_id.user_id()).ok_or_else(|| {
            invalid(format!("user `{}` missing from trustchain", device_id.user_id()))
        })?;
        debug!(device_id = %device_id, "device trustchain verified");

        Ok(VerifiedDevice {
            revoked_user: verified.revoked_users.remove(device_id.user_id()),
            user,
            device,
            trustchain: collected.bundle(),
        })
    }

    /// Resolve `user_id` and its trustchain.
    pub async fn resolve_user(&self, user_id: &UserId, no_cache: bool) -> Result<VerifiedUser> {
        let cached = CachedSource {
            verifier: self,
            no_cache,
        };
        let collected = collect_trustchain(&cached, std::slice::from_ref(user_id), &[]).await?;
        let mut verified = self.verify(&collected)?;

        let user = verified
            .users
            .remove(user_id)
            .ok_or_else(|| invalid(format!("user `{}` missing from trustchain", user_id)))?;

        Ok(VerifiedUser {
            revoked_user: verified.revoked_users.remove(user_id),
            user,
            trustchain: collected.bundle(),
        })
    }

    fn verify(&self, collected: &CollectedTrustchain) -> Result<VerifiedTrustchain> {
        verify_trustchain(&self.root_verify_key, collected).map_err(|e| {
            warn!(error = %e, "trustchain rejected");
            e
        })
    }
}

struct CachedSource<'a, S> {
    verifier: &'a TrustchainVerifier<S>,
    no_cache: bool,
}

#[async_trait]
impl<'a, S: CertificateSource> CertificateSource for CachedSource<'a, S> {
    async fn fetch_user(&self, user_id: &UserId) -> Result<UserRecord> {
        if !self.no_cache {
            if let Some(record) = self.verifier.users.read().await.get(user_id) {
                return Ok(record.clone());
            }
        }
        let record = self.verifier.source.fetch_user(user_id).await?;
        self.verifier
            .users
            .write()
            .await
            .insert(user_id.clone(), record.clone());
        Ok(record)
    }

    async fn fetch_device(&self, device_id: &DeviceId) -> Result<Vec<u8>> {
        if !self.no_cache {
            if let Some(signed) = self.verifier.devices.read().await.get(device_id) {
                return Ok(signed.clone());
            }
        }
        let signed = self.verifier.source.fetch_device(device_id).await?;
        self.verifier
            .devices
            .write()
            .await
            .insert(device_id.clone(), signed.clone());
        Ok(signed)
    }
}
