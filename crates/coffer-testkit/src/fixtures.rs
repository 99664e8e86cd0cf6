//! Test fixtures and helpers.
//!
//! An [`Organization`] is a backend plus the root key certifying its first
//! users. Every certificate it issues is really signed, so clients built on
//! top of it verify full trustchains.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use coffer_backend::{AuthenticatedCmds, Backend, BackendConfig, BackendError, UserError};
use coffer_core::{
    Certificate, DeviceCertificate, DeviceId, EntryId, RealmId, RealmRole, RealmRoleCertificate,
    RevokedUserCertificate, SigningKey, Timestamp, UserCertificate, UserId, UserProfile,
};
use coffer_perms::{PrivateKey, RemoteManifest};
use coffer_store::{DeviceEntry, DirectoryStore, MemoryStore, RealmStore, UserEntry};
use coffer_sync::{LoaderConfig, LocalDevice, MemoryLocalStorage, RemoteLoader, WorkspaceEntry};

/// Remote loader running against an in-process backend.
pub type TestLoader = RemoteLoader<AuthenticatedCmds, MemoryLocalStorage>;

/// A backend with its organization root key.
pub struct Organization {
    pub root_key: SigningKey,
    pub backend: Arc<Backend>,
    clock: AtomicI64,
}

impl Organization {
    /// Organization on an in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Organization on `store`, which the caller may keep to tamper with.
    pub fn with_store<S>(store: Arc<S>) -> Self
    where
        S: RealmStore + DirectoryStore + 'static,
    {
        let root_key = SigningKey::generate();
        let backend = Backend::with_store(BackendConfig::default(), root_key.verify_key(), store);
        Self::from_parts(root_key, backend)
    }

    /// Organization on the store selected by `config`.
    pub fn with_config(config: BackendConfig) -> Result<Self, BackendError> {
        let root_key = SigningKey::generate();
        let backend = Backend::open(config, root_key.verify_key())?;
        Ok(Self::from_parts(root_key, backend))
    }

    fn from_parts(root_key: SigningKey, backend: Arc<Backend>) -> Self {
        Self {
            root_key,
            backend,
            clock: AtomicI64::new(0),
        }
    }

    /// Current time, strictly increasing across calls.
    pub fn now(&self) -> Timestamp {
        let now = Timestamp::now().as_millis();
        let mut last = self.clock.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .clock
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Timestamp::from_millis(next),
                Err(actual) => last = actual,
            }
        }
    }

    /// Register a user and its first device, both certified by the root key.
    pub async fn bootstrap_user(
        &self,
        name: &str,
        profile: UserProfile,
    ) -> Result<LocalDevice, UserError> {
        self.register_user(None, &self.root_key, name, profile).await
    }

    /// Register a user and its first device, certified by `by`.
    pub async fn new_user(
        &self,
        by: &LocalDevice,
        name: &str,
        profile: UserProfile,
    ) -> Result<LocalDevice, UserError> {
        self.register_user(Some(&by.device_id), &by.signing_key, name, profile)
            .await
    }

    async fn register_user(
        &self,
        author: Option<&DeviceId>,
        author_key: &SigningKey,
        name: &str,
        profile: UserProfile,
    ) -> Result<LocalDevice, UserError> {
        let user_id = parse_user_id(name);
        let device = LocalDevice::new(
            device_id(&user_id, "dev1"),
            SigningKey::generate(),
            PrivateKey::generate(),
        );
        let timestamp = self.now();

        let user_certificate = UserCertificate {
            author: author.cloned(),
            timestamp,
            user_id: user_id.clone(),
            public_key: device.public_key().0,
            profile,
        }
        .dump_and_sign(author_key);
        let user = UserEntry {
            user_id,
            profile,
            public_key: device.public_key().0,
            user_certificate,
            user_certifier: author.cloned(),
            created_on: timestamp,
            revoked_on: None,
            revoked_user_certificate: None,
            revoked_user_certifier: None,
        };
        let device_entry = self.device_entry(author, author_key, &device, timestamp);

        self.backend.user().create_user(user, device_entry).await?;
        Ok(device)
    }

    /// Register another device of `sibling`'s user, certified by `sibling`.
    pub async fn new_device(
        &self,
        sibling: &LocalDevice,
        device_name: &str,
    ) -> Result<LocalDevice, UserError> {
        let device = LocalDevice::new(
            device_id(sibling.device_id.user_id(), device_name),
            SigningKey::generate(),
            sibling.private_key.clone(),
        );
        let entry = self.device_entry(
            Some(&sibling.device_id),
            &sibling.signing_key,
            &device,
            self.now(),
        );
        self.backend.user().create_device(entry).await?;
        Ok(device)
    }

    fn device_entry(
        &self,
        author: Option<&DeviceId>,
        author_key: &SigningKey,
        device: &LocalDevice,
        timestamp: Timestamp,
    ) -> DeviceEntry {
        let verify_key = device.signing_key.verify_key();
        let device_certificate = DeviceCertificate {
            author: author.cloned(),
            timestamp,
            device_id: device.device_id.clone(),
            verify_key,
        }
        .dump_and_sign(author_key);
        DeviceEntry {
            device_id: device.device_id.clone(),
            verify_key,
            device_certificate,
            device_certifier: author.cloned(),
            created_on: timestamp,
        }
    }

    /// Revoke `user_id`, signed by `by`.
    pub async fn revoke_user(&self, by: &LocalDevice, user_id: &UserId) -> Result<(), UserError> {
        let timestamp = self.now();
        let certificate = RevokedUserCertificate {
            author: by.device_id.clone(),
            timestamp,
            user_id: user_id.clone(),
        }
        .dump_and_sign(&by.signing_key);
        self.backend
            .user()
            .revoke_user(user_id, &certificate, &by.device_id, timestamp)
            .await
    }

    pub async fn connect(&self, device: &LocalDevice) -> Result<Arc<AuthenticatedCmds>, BackendError> {
        Ok(Arc::new(self.backend.connect(&device.device_id).await?))
    }

    /// A remote loader of `workspace` running as `device`.
    pub async fn loader(
        &self,
        device: &LocalDevice,
        workspace: WorkspaceEntry,
    ) -> Result<TestLoader, BackendError> {
        let cmds = self.connect(device).await?;
        Ok(RemoteLoader::new(
            device.clone(),
            workspace,
            cmds,
            self.root_key.verify_key(),
            Arc::new(MemoryLocalStorage::new()),
            LoaderConfig::default(),
        ))
    }

    /// A role certificate issued by `author` now.
    pub fn role_certificate(
        &self,
        author: &LocalDevice,
        realm_id: RealmId,
        user_id: &UserId,
        role: Option<RealmRole>,
    ) -> Vec<u8> {
        RealmRoleCertificate {
            author: Some(author.device_id.clone()),
            timestamp: self.now(),
            realm_id,
            user_id: user_id.clone(),
            role,
        }
        .dump_and_sign(&author.signing_key)
    }

    /// The self-signed owner certificate creating `realm_id`.
    pub fn realm_root_certificate(&self, author: &LocalDevice, realm_id: RealmId) -> Vec<u8> {
        RealmRoleCertificate::build_realm_root_certif(author.device_id.clone(), self.now(), realm_id)
            .dump_and_sign(&author.signing_key)
    }

    /// A manifest authored by `author` now.
    pub fn manifest(
        &self,
        author: &LocalDevice,
        entry_id: EntryId,
        version: u64,
        content: &[u8],
    ) -> RemoteManifest {
        RemoteManifest {
            entry_id,
            version,
            author: author.device_id.clone(),
            timestamp: self.now(),
            content: content.to_vec(),
        }
    }
}

impl Default for Organization {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_user_id(name: &str) -> UserId {
    match name.parse() {
        Ok(user_id) => user_id,
        Err(e) => panic!("invalid user name {:?}: {}", name, e),
    }
}

fn device_id(user_id: &UserId, device_name: &str) -> DeviceId {
    match user_id.to_device_id(device_name) {
        Ok(device_id) => device_id,
        Err(e) => panic!("invalid device name {:?}: {}", device_name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_strictly_increasing() {
        let org = Organization::new();
        let a = org.now();
        let b = org.now();
        let c = org.now();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_users_and_devices() {
        let org = Organization::new();
        let alice = org.bootstrap_user("alice", UserProfile::Admin).await.unwrap();
        let bob = org.new_user(&alice, "bob", UserProfile::Standard).await.unwrap();
        let bob2 = org.new_device(&bob, "dev2").await.unwrap();

        let (user, devices) = org
            .backend
            .user()
            .get_user_with_devices(bob.device_id.user_id())
            .await
            .unwrap();
        assert_eq!(user.user_certifier, Some(alice.device_id.clone()));
        assert_eq!(devices.len(), 2);
        assert_eq!(bob2.public_key(), bob.public_key());

        let bundle = org
            .backend
            .user()
            .get_trustchain(&[], &[bob2.device_id.clone()])
            .await
            .unwrap();
        // bob@dev2 <- bob@dev1 <- alice@dev1 <- root
        assert_eq!(bundle.devices.len(), 3);
        assert_eq!(bundle.users.len(), 2);

        org.revoke_user(&alice, bob.device_id.user_id()).await.unwrap();
        assert!(org.connect(&bob).await.is_err());
        assert!(org.connect(&alice).await.is_ok());
    }
}
