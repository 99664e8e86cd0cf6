//! User and device directory.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use coffer_core::{DeviceId, Timestamp, UserId};
use coffer_perms::{collect_trustchain, CertificateSource, TrustchainBundle, TrustchainError, UserRecord};
use coffer_store::{DeviceEntry, DirectoryStore, StoreError, UserEntry};

use crate::error::UserError;

type Result<T> = std::result::Result<T, UserError>;

/// Serves stored certificates to the trustchain walk.
struct DirectorySource<'a> {
    store: &'a dyn DirectoryStore,
}

fn store_lookup_error(e: StoreError) -> TrustchainError {
    TrustchainError::InvalidTrustchain(format!("storage error: {}", e))
}

#[async_trait]
impl<'a> CertificateSource for DirectorySource<'a> {
    async fn fetch_user(&self, user_id: &UserId) -> std::result::Result<UserRecord, TrustchainError> {
        let user = self
            .store
            .get_user(user_id)
            .await
            .map_err(store_lookup_error)?
            .ok_or_else(|| TrustchainError::UserNotFound(user_id.clone()))?;
        Ok(UserRecord {
            user_certificate: user.user_certificate,
            revoked_user_certificate: user.revoked_user_certificate,
        })
    }

    async fn fetch_device(&self, device_id: &DeviceId) -> std::result::Result<Vec<u8>, TrustchainError> {
        let device = self
            .store
            .get_device(device_id)
            .await
            .map_err(store_lookup_error)?
            .ok_or_else(|| TrustchainError::DeviceNotFound(device_id.clone()))?;
        Ok(device.device_certificate)
    }
}

/// One page of a user search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPage {
    pub users: Vec<UserId>,
    /// Number of matches over all pages.
    pub total: usize,
}

/// Registered users and devices of the organization.
pub struct UserComponent {
    store: Arc<dyn DirectoryStore>,
}

impl UserComponent {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self { store }
    }

    pub async fn create_user(&self, user: UserEntry, first_device: DeviceEntry) -> Result<()> {
        self.store
            .create_user(&user, &first_device)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists(what) => UserError::AlreadyExists(what),
                e => e.into(),
            })?;
        info!(user_id = %user.user_id, profile = user.profile.as_str(), "user created");
        Ok(())
    }

    pub async fn create_device(&self, device: DeviceEntry) -> Result<()> {
        self.store.create_device(&device).await.map_err(|e| match e {
            StoreError::NotFound(_) => UserError::UserNotFound(device.device_id.user_id().clone()),
            StoreError::AlreadyExists(what) => UserError::AlreadyExists(what),
            e => e.into(),
        })?;
        info!(device_id = %device.device_id, "device created");
        Ok(())
    }

    pub async fn revoke_user(
        &self,
        user_id: &UserId,
        revoked_user_certificate: &[u8],
        revoked_user_certifier: &DeviceId,
        revoked_on: Timestamp,
    ) -> Result<()> {
        let user = self.get_user(user_id).await?;
        if user.is_revoked() {
            return Err(UserError::UserAlreadyRevoked(user_id.clone()));
        }
        self.store
            .revoke_user(
                user_id,
                revoked_user_certificate,
                revoked_user_certifier,
                revoked_on,
            )
            .await?;
        info!(user_id = %user_id, by = %revoked_user_certifier, "user revoked");
        Ok(())
    }

    pub async fn get_user(&self, user_id: &UserId) -> Result<UserEntry> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| UserError::UserNotFound(user_id.clone()))
    }

    pub async fn get_device(&self, device_id: &DeviceId) -> Result<DeviceEntry> {
        self.store
            .get_device(device_id)
            .await?
            .ok_or_else(|| UserError::DeviceNotFound(device_id.clone()))
    }

    pub async fn get_user_with_device(&self, device_id: &DeviceId) -> Result<(UserEntry, DeviceEntry)> {
        let user = self.get_user(device_id.user_id()).await?;
        let device = self.get_device(device_id).await?;
        Ok((user, device))
    }

    pub async fn get_user_with_devices(&self, user_id: &UserId) -> Result<(UserEntry, Vec<DeviceEntry>)> {
        let user = self.get_user(user_id).await?;
        let devices = self.store.get_user_devices(user_id).await?;
        Ok((user, devices))
    }

    /// Users whose id contains `query`, paginated from page 1.
    pub async fn find(
        &self,
        query: Option<&str>,
        page: usize,
        per_page: usize,
        omit_revoked: bool,
    ) -> Result<UserPage> {
        let query = query.map(str::to_lowercase);
        let matches: Vec<UserId> = self
            .store
            .list_users()
            .await?
            .into_iter()
            .filter(|user| !(omit_revoked && user.is_revoked()))
            .filter(|user| {
                query
                    .as_deref()
                    .map_or(true, |q| user.user_id.as_str().to_lowercase().contains(q))
            })
            .map(|user| user.user_id)
            .collect();

        let total = matches.len();
        let skip = page.saturating_sub(1).saturating_mul(per_page);
        let users = matches.into_iter().skip(skip).take(per_page).collect();
        Ok(UserPage { users, total })
    }

    /// Every certificate needed to verify `users` and `devices`.
    pub async fn get_trustchain(
        &self,
        users: &[UserId],
        devices: &[DeviceId],
    ) -> Result<TrustchainBundle> {
        let source = DirectorySource {
            store: self.store.as_ref(),
        };
        let collected = collect_trustchain(&source, users, devices).await?;
        Ok(collected.bundle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::{UserProfile, VerifyKey};
    use coffer_store::MemoryStore;

    fn user(name: &str) -> (UserEntry, DeviceEntry) {
        let user_id: UserId = name.parse().unwrap();
        let device_id = user_id.to_device_id("dev1").unwrap();
        let user = UserEntry {
            user_id,
            profile: UserProfile::Standard,
            public_key: [0; 32],
            user_certificate: format!("{}-certif", name).into_bytes(),
            user_certifier: None,
            created_on: Timestamp::from_millis(1),
            revoked_on: None,
            revoked_user_certificate: None,
            revoked_user_certifier: None,
        };
        let device = DeviceEntry {
            device_id,
            verify_key: VerifyKey::from_bytes([0; 32]),
            device_certificate: format!("{}-dev1-certif", name).into_bytes(),
            device_certifier: None,
            created_on: Timestamp::from_millis(1),
        };
        (user, device)
    }

    async fn component(names: &[&str]) -> UserComponent {
        let users = UserComponent::new(Arc::new(MemoryStore::new()));
        for name in names {
            let (user, device) = user(name);
            users.create_user(user, device).await.unwrap();
        }
        users
    }

    #[tokio::test]
    async fn test_create_twice() {
        let users = component(&["alice"]).await;
        let (user, device) = user("alice");
        assert!(matches!(
            users.create_user(user, device).await,
            Err(UserError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_create_device_for_unknown_user() {
        let users = component(&[]).await;
        let (_, device) = user("ghost");
        assert!(matches!(
            users.create_device(device).await,
            Err(UserError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_once() {
        let users = component(&["alice", "bob"]).await;
        let bob: UserId = "bob".parse().unwrap();
        let by: DeviceId = "alice@dev1".parse().unwrap();

        users.revoke_user(&bob, b"revoked", &by, Timestamp::from_millis(5)).await.unwrap();
        assert!(users.get_user(&bob).await.unwrap().is_revoked());
        assert!(matches!(
            users.revoke_user(&bob, b"revoked", &by, Timestamp::from_millis(6)).await,
            Err(UserError::UserAlreadyRevoked(_))
        ));
    }

    #[tokio::test]
    async fn test_find_paginates_and_filters() {
        let users = component(&["alice", "albert", "bob", "carol"]).await;
        let by: DeviceId = "bob@dev1".parse().unwrap();
        users
            .revoke_user(&"albert".parse().unwrap(), b"r", &by, Timestamp::from_millis(2))
            .await
            .unwrap();

        let page = users.find(Some("AL"), 1, 10, false).await.unwrap();
        assert_eq!(page.total, 2);

        let page = users.find(Some("al"), 1, 10, true).await.unwrap();
        assert_eq!(page.users, vec!["alice".parse::<UserId>().unwrap()]);

        let page = users.find(None, 2, 3, false).await.unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.users, vec!["carol".parse::<UserId>().unwrap()]);
    }

    #[tokio::test]
    async fn test_unknown_lookups() {
        let users = component(&["alice"]).await;
        assert!(matches!(
            users.get_device(&"alice@dev2".parse().unwrap()).await,
            Err(UserError::DeviceNotFound(_))
        ));
        assert!(matches!(
            users.get_user_with_device(&"bob@dev1".parse().unwrap()).await,
            Err(UserError::UserNotFound(_))
        ));
    }
}
