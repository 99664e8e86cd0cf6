//! Realm role authority and reencryption maintenance.
//!
//! Every read-modify-write sequence on a realm (`create`, `update_roles`,
//! `start_reencryption_maintenance`, `finish_reencryption_maintenance`) runs
//! under that realm's lock, so the roles read for authorization cannot
//! change before the append that depends on them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use coffer_core::{
    DeviceId, RealmId, RealmRole, RealmStatus, RoleGrant, Timestamp, UserId, UserProfile,
};
use coffer_perms::{can_update_role, RoleLog};
use coffer_store::{DirectoryStore, RealmStats, RealmStore, StoreError};

use crate::error::RealmError;
use crate::events::{BackendEvent, EventBus};
use crate::locks::RealmLocks;
use crate::message::MessageSink;

type Result<T> = std::result::Result<T, RealmError>;

/// Fold a realm's whole role log into its current roles.
pub(crate) async fn load_role_log(
    store: &dyn RealmStore,
    realm_id: &RealmId,
) -> std::result::Result<RoleLog, StoreError> {
    let grants = store.get_role_grants(realm_id, None).await?;
    Ok(RoleLog::from_grants(&grants))
}

/// The single source of truth on who holds which role on a realm.
pub struct RealmComponent {
    store: Arc<dyn RealmStore>,
    directory: Arc<dyn DirectoryStore>,
    messages: Arc<dyn MessageSink>,
    events: EventBus,
    locks: Arc<RealmLocks>,
}

impl RealmComponent {
    pub fn new(
        store: Arc<dyn RealmStore>,
        directory: Arc<dyn DirectoryStore>,
        messages: Arc<dyn MessageSink>,
        events: EventBus,
        locks: Arc<RealmLocks>,
    ) -> Self {
        Self {
            store,
            directory,
            messages,
            events,
            locks,
        }
    }

    async fn status_of(&self, realm_id: &RealmId) -> Result<RealmStatus> {
        self.store
            .get_realm_status(realm_id)
            .await?
            .ok_or(RealmError::RealmNotFound(*realm_id))
    }

    /// Current role of `author`'s user, failing unless it holds one.
    async fn check_has_role(&self, author: &DeviceId, realm_id: &RealmId) -> Result<RealmRole> {
        let log = load_role_log(self.store.as_ref(), realm_id).await?;
        log.role_of(author.user_id())
            .ok_or_else(|| RealmError::AccessError(format!("`{}` has no role on the realm", author)))
    }

    async fn check_owner(&self, author: &DeviceId, realm_id: &RealmId) -> Result<()> {
        match self.check_has_role(author, realm_id).await? {
            RealmRole::Owner => Ok(()),
            role => Err(RealmError::AccessError(format!(
                "`{}` is {}, not owner",
                author,
                role.as_str()
            ))),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Realm Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a realm from its self-signed owner grant.
    pub async fn create(&self, self_grant: RoleGrant) -> Result<()> {
        let self_signed = self_grant
            .granted_by
            .as_ref()
            .map_or(false, |by| by.user_id() == &self_grant.user_id);
        if self_grant.role != Some(RealmRole::Owner) || !self_signed {
            return Err(RealmError::InvalidCertification(
                "realm creation needs a self-signed owner grant".into(),
            ));
        }

        let realm_id = self_grant.realm_id;
        let _guard = self.locks.lock(&realm_id).await;
        self.store
            .create_realm(&realm_id, &self_grant)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists(_) => RealmError::AlreadyExists(realm_id),
                e => e.into(),
            })?;
        info!(realm_id = %realm_id, owner = %self_grant.user_id, "realm created");
        Ok(())
    }

    pub async fn get_status(&self, author: &DeviceId, realm_id: &RealmId) -> Result<RealmStatus> {
        let status = self.status_of(realm_id).await?;
        self.check_has_role(author, realm_id).await?;
        Ok(status)
    }

    pub async fn get_stats(&self, author: &DeviceId, realm_id: &RealmId) -> Result<RealmStats> {
        self.status_of(realm_id).await?;
        self.check_has_role(author, realm_id).await?;
        Ok(self.store.get_realm_stats(realm_id).await?)
    }

    pub async fn get_current_roles(&self, realm_id: &RealmId) -> Result<HashMap<UserId, RealmRole>> {
        self.status_of(realm_id).await?;
        Ok(load_role_log(self.store.as_ref(), realm_id).await?.current_roles())
    }

    /// Signed role certificates, optionally only those issued after `since`.
    pub async fn get_role_certificates(
        &self,
        author: &DeviceId,
        realm_id: &RealmId,
        since: Option<Timestamp>,
    ) -> Result<Vec<Vec<u8>>> {
        self.status_of(realm_id).await?;
        self.check_has_role(author, realm_id).await?;
        let grants = self.store.get_role_grants(realm_id, since).await?;
        Ok(grants.into_iter().map(|grant| grant.certificate).collect())
    }

    /// Realms on which `user_id` currently holds a role.
    pub async fn get_realms_for_user(&self, user_id: &UserId) -> Result<HashMap<RealmId, RealmRole>> {
        let mut realms = HashMap::new();
        for realm_id in self.store.get_realm_ids_for_user(user_id).await? {
            let log = load_role_log(self.store.as_ref(), &realm_id).await?;
            if let Some(role) = log.role_of(user_id) {
                realms.insert(realm_id, role);
            }
        }
        Ok(realms)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a role grant or revocation.
    ///
    /// Grants are strictly ordered: `granted_on` must be later than every
    /// grant already in the realm's log, root certificate included.
    /// `recipient_message` is delivered to the target user once the grant is
    /// stored and announced.
    pub async fn update_roles(
        &self,
        new_grant: RoleGrant,
        recipient_message: Option<Vec<u8>>,
    ) -> Result<()> {
        let realm_id = new_grant.realm_id;
        let granted_by = new_grant
            .granted_by
            .clone()
            .ok_or_else(|| RealmError::AccessError("role grant has no author".into()))?;
        if granted_by.user_id() == &new_grant.user_id {
            return Err(RealmError::AccessError(
                "a user cannot change its own role".into(),
            ));
        }

        let _guard = self.locks.lock(&realm_id).await;

        let user = self
            .directory
            .get_user(&new_grant.user_id)
            .await?
            .ok_or_else(|| RealmError::UserNotFound(new_grant.user_id.clone()))?;
        let privileged = new_grant.role.map_or(false, RealmRole::is_privileged);
        if user.profile == UserProfile::Outsider && privileged {
            return Err(RealmError::IncompatibleProfile(format!(
                "outsider `{}` cannot be {}",
                user.user_id,
                new_grant.role.map_or("none", RealmRole::as_str)
            )));
        }

        if self.status_of(&realm_id).await?.in_maintenance() {
            return Err(RealmError::InMaintenance(realm_id));
        }

        let log = load_role_log(self.store.as_ref(), &realm_id).await?;
        let existing = log.role_of(&new_grant.user_id);
        let granter_role = log.role_of(granted_by.user_id());
        if !can_update_role(granter_role, existing, new_grant.role) {
            return Err(RealmError::AccessError(format!(
                "`{}` cannot change `{}` from {} to {}",
                granted_by,
                new_grant.user_id,
                existing.map_or("none", RealmRole::as_str),
                new_grant.role.map_or("none", RealmRole::as_str),
            )));
        }
        if existing == new_grant.role {
            return Err(RealmError::RoleAlreadyGranted);
        }
        if let Some(last) = log.last_timestamp() {
            if new_grant.granted_on <= last {
                return Err(RealmError::RequireGreaterTimestamp(last));
            }
        }

        self.store.append_role_grant(&new_grant).await?;
        info!(
            realm_id = %realm_id,
            user_id = %new_grant.user_id,
            role = new_grant.role.map_or("none", RealmRole::as_str),
            by = %granted_by,
            "realm role updated"
        );
        self.events.publish(BackendEvent::RealmRolesUpdated {
            author: granted_by.clone(),
            realm_id,
            user_id: new_grant.user_id.clone(),
            role: new_grant.role,
        });

        if let Some(body) = recipient_message {
            self.messages
                .send(&granted_by, &new_grant.user_id, new_grant.granted_on, body)
                .await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Enter reencryption maintenance towards `encryption_revision`.
    ///
    /// `per_participant_message` must hold exactly one message for each
    /// non-revoked user currently holding a role. Recipients are all checked
    /// before the new status is committed, so only a storage failure can
    /// interrupt delivery afterwards. In that case the error is returned and
    /// the realm stays in maintenance: the cycle can still be completed with
    /// [`finish_reencryption_maintenance`](Self::finish_reencryption_maintenance).
    pub async fn start_reencryption_maintenance(
        &self,
        author: &DeviceId,
        realm_id: &RealmId,
        encryption_revision: u64,
        per_participant_message: HashMap<UserId, Vec<u8>>,
        timestamp: Timestamp,
    ) -> Result<()> {
        let _guard = self.locks.lock(realm_id).await;

        let status = self.status_of(realm_id).await?;
        self.check_owner(author, realm_id).await?;
        if status.in_maintenance() {
            return Err(RealmError::InMaintenance(*realm_id));
        }
        if encryption_revision != status.encryption_revision + 1 {
            return Err(RealmError::EncryptionRevisionError(format!(
                "expected revision {}, got {}",
                status.encryption_revision + 1,
                encryption_revision
            )));
        }

        let mut participants = BTreeSet::new();
        let roles = load_role_log(self.store.as_ref(), realm_id).await?.current_roles();
        for user_id in roles.into_keys() {
            let revoked = match self.directory.get_user(&user_id).await? {
                Some(user) => user.is_revoked(),
                None => true,
            };
            if !revoked {
                participants.insert(user_id);
            }
        }
        let messages: BTreeMap<UserId, Vec<u8>> = per_participant_message.into_iter().collect();
        let recipients: BTreeSet<&UserId> = messages.keys().collect();
        let mismatch: Vec<String> = participants
            .iter()
            .collect::<BTreeSet<_>>()
            .symmetric_difference(&recipients)
            .map(|user_id| user_id.to_string())
            .collect();
        if !mismatch.is_empty() {
            return Err(RealmError::ParticipantsMismatch(format!(
                "recipients differ from realm participants on {}",
                mismatch.join(", ")
            )));
        }
        // Every recipient is now a known, non-revoked user.

        let new_status = status.start_reencryption(encryption_revision, author.clone(), timestamp);
        self.store.start_reencryption(realm_id, &new_status).await?;
        info!(realm_id = %realm_id, encryption_revision, by = %author, "maintenance started");
        self.events.publish(BackendEvent::RealmMaintenanceStarted {
            author: author.clone(),
            realm_id: *realm_id,
            encryption_revision,
        });

        for (recipient, body) in messages {
            if let Err(e) = self.messages.send(author, &recipient, timestamp, body).await {
                warn!(realm_id = %realm_id, recipient = %recipient, error = %e, "rekey message not delivered");
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Leave maintenance once every vlob version has been reencrypted.
    pub async fn finish_reencryption_maintenance(
        &self,
        author: &DeviceId,
        realm_id: &RealmId,
        encryption_revision: u64,
    ) -> Result<()> {
        let _guard = self.locks.lock(realm_id).await;

        let status = self.status_of(realm_id).await?;
        self.check_owner(author, realm_id).await?;
        if !status.in_maintenance() {
            return Err(RealmError::NotInMaintenance(*realm_id));
        }
        if encryption_revision != status.encryption_revision {
            return Err(RealmError::EncryptionRevisionError(format!(
                "expected revision {}, got {}",
                status.encryption_revision, encryption_revision
            )));
        }

        let previous = self
            .store
            .count_items_at_revision(realm_id, encryption_revision - 1)
            .await?;
        let current = self
            .store
            .count_items_at_revision(realm_id, encryption_revision)
            .await?;
        debug!(realm_id = %realm_id, ?previous, ?current, "reencryption progress");
        match (previous, current) {
            (Some(previous), Some(current)) if previous == current => {}
            _ => {
                return Err(RealmError::MaintenanceError(
                    "reencryption operations are not over".into(),
                ))
            }
        }

        self.store
            .set_realm_status(realm_id, &status.finish_maintenance())
            .await?;
        info!(realm_id = %realm_id, encryption_revision, by = %author, "maintenance finished");
        self.events.publish(BackendEvent::RealmMaintenanceFinished {
            author: author.clone(),
            realm_id: *realm_id,
            encryption_revision,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::VerifyKey;
    use coffer_sync::Status;
    use coffer_store::{DeviceEntry, MemoryStore, UserEntry};

    use crate::message::MessageComponent;

    struct Fixture {
        store: Arc<MemoryStore>,
        realm: RealmComponent,
        events: EventBus,
        realm_id: RealmId,
    }

    fn device(name: &str) -> DeviceId {
        format!("{}@dev1", name).parse().unwrap()
    }

    fn grant(realm_id: RealmId, by: &str, user: &str, role: Option<RealmRole>, at: i64) -> RoleGrant {
        RoleGrant {
            realm_id,
            user_id: user.parse().unwrap(),
            role,
            granted_by: Some(device(by)),
            granted_on: Timestamp::from_millis(at),
            certificate: format!("{}->{}@{}", by, user, at).into_bytes(),
        }
    }

    async fn add_user(store: &MemoryStore, name: &str, profile: UserProfile) {
        let device_id = device(name);
        let user = UserEntry {
            user_id: device_id.user_id().clone(),
            profile,
            public_key: [0; 32],
            user_certificate: vec![],
            user_certifier: None,
            created_on: Timestamp::from_millis(0),
            revoked_on: None,
            revoked_user_certificate: None,
            revoked_user_certifier: None,
        };
        let device = DeviceEntry {
            device_id,
            verify_key: VerifyKey::from_bytes([0; 32]),
            device_certificate: vec![],
            device_certifier: None,
            created_on: Timestamp::from_millis(0),
        };
        store.create_user(&user, &device).await.unwrap();
    }

    /// Realm owned by alice, with bob (standard) and olivia (outsider) known.
    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        add_user(&store, "alice", UserProfile::Admin).await;
        add_user(&store, "bob", UserProfile::Standard).await;
        add_user(&store, "carol", UserProfile::Standard).await;
        add_user(&store, "olivia", UserProfile::Outsider).await;

        let events = EventBus::new(16);
        let messages = Arc::new(MessageComponent::new(store.clone(), events.clone()));
        let realm = RealmComponent::new(
            store.clone(),
            store.clone(),
            messages,
            events.clone(),
            Arc::new(RealmLocks::new()),
        );
        let realm_id = RealmId::from_bytes([9; 16]);
        realm
            .create(grant(realm_id, "alice", "alice", Some(RealmRole::Owner), 1))
            .await
            .unwrap();
        Fixture {
            store,
            realm,
            events,
            realm_id,
        }
    }

    #[tokio::test]
    async fn test_create_requires_self_signed_owner() {
        let f = fixture().await;
        let other = RealmId::from_bytes([1; 16]);
        assert!(matches!(
            f.realm.create(grant(other, "alice", "bob", Some(RealmRole::Owner), 1)).await,
            Err(RealmError::InvalidCertification(_))
        ));
        assert!(matches!(
            f.realm.create(grant(other, "bob", "bob", Some(RealmRole::Manager), 1)).await,
            Err(RealmError::InvalidCertification(_))
        ));
        assert!(matches!(
            f.realm.create(grant(f.realm_id, "bob", "bob", Some(RealmRole::Owner), 2)).await,
            Err(RealmError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_update_roles_check_order() {
        let f = fixture().await;

        // Profile is checked before authorization.
        assert!(matches!(
            f.realm
                .update_roles(grant(f.realm_id, "carol", "olivia", Some(RealmRole::Manager), 2), None)
                .await,
            Err(RealmError::IncompatibleProfile(_))
        ));
        f.realm
            .update_roles(grant(f.realm_id, "alice", "olivia", Some(RealmRole::Reader), 2), None)
            .await
            .unwrap();

        assert!(matches!(
            f.realm
                .update_roles(grant(f.realm_id, "carol", "bob", Some(RealmRole::Reader), 3), None)
                .await,
            Err(RealmError::AccessError(_))
        ));

        f.realm
            .update_roles(grant(f.realm_id, "alice", "bob", Some(RealmRole::Manager), 3), None)
            .await
            .unwrap();
        // A manager handles plain roles only.
        f.realm
            .update_roles(grant(f.realm_id, "bob", "carol", Some(RealmRole::Contributor), 4), None)
            .await
            .unwrap();
        assert!(matches!(
            f.realm
                .update_roles(grant(f.realm_id, "bob", "carol", Some(RealmRole::Manager), 5), None)
                .await,
            Err(RealmError::AccessError(_))
        ));

        let before = f.store.get_role_grants(&f.realm_id, None).await.unwrap().len();
        assert!(matches!(
            f.realm
                .update_roles(grant(f.realm_id, "alice", "carol", Some(RealmRole::Contributor), 6), None)
                .await,
            Err(RealmError::RoleAlreadyGranted)
        ));
        let after = f.store.get_role_grants(&f.realm_id, None).await.unwrap().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_grants_are_strictly_ordered() {
        let f = fixture().await;
        let bob: UserId = "bob".parse().unwrap();

        // The root is dated 1.
        for at in [0, 1] {
            assert!(matches!(
                f.realm
                    .update_roles(grant(f.realm_id, "alice", "bob", Some(RealmRole::Reader), at), None)
                    .await,
                Err(RealmError::RequireGreaterTimestamp(_))
            ));
        }

        f.realm
            .update_roles(grant(f.realm_id, "alice", "bob", Some(RealmRole::Contributor), 10), None)
            .await
            .unwrap();
        for at in [5, 6, 10] {
            let err = f
                .realm
                .update_roles(grant(f.realm_id, "alice", "bob", None, at), None)
                .await
                .unwrap_err();
            assert!(matches!(err, RealmError::RequireGreaterTimestamp(last) if last == Timestamp::from_millis(10)));
            assert_eq!(err.status(), Status::BadTimestamp);
        }
        assert_eq!(
            f.realm.get_current_roles(&f.realm_id).await.unwrap().get(&bob),
            Some(&RealmRole::Contributor)
        );
        assert_eq!(f.store.get_role_grants(&f.realm_id, None).await.unwrap().len(), 2);

        f.realm
            .update_roles(grant(f.realm_id, "alice", "bob", None, 11), None)
            .await
            .unwrap();
        assert!(f.realm.get_current_roles(&f.realm_id).await.unwrap().get(&bob).is_none());
    }

    #[tokio::test]
    async fn test_cannot_change_own_role() {
        let f = fixture().await;
        assert!(matches!(
            f.realm
                .update_roles(grant(f.realm_id, "alice", "alice", None, 2), None)
                .await,
            Err(RealmError::AccessError(_))
        ));
    }

    #[tokio::test]
    async fn test_roles_event_precedes_message() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();
        f.realm
            .update_roles(
                grant(f.realm_id, "alice", "bob", Some(RealmRole::Reader), 2),
                Some(b"welcome".to_vec()),
            )
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), BackendEvent::RealmRolesUpdated { .. }));
        assert!(matches!(rx.recv().await.unwrap(), BackendEvent::MessageReceived { index: 0, .. }));
        let inbox = f.store.get_messages(&"bob".parse().unwrap(), 0).await.unwrap();
        assert_eq!(inbox[0].body, b"welcome".to_vec());
    }

    #[tokio::test]
    async fn test_role_reads_need_a_role() {
        let f = fixture().await;
        assert!(matches!(
            f.realm.get_role_certificates(&device("bob"), &f.realm_id, None).await,
            Err(RealmError::AccessError(_))
        ));
        assert_eq!(
            f.realm
                .get_role_certificates(&device("alice"), &f.realm_id, None)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(matches!(
            f.realm.get_status(&device("alice"), &RealmId::from_bytes([0; 16])).await,
            Err(RealmError::RealmNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_realms_for_user_skip_revoked_roles() {
        let f = fixture().await;
        f.realm
            .update_roles(grant(f.realm_id, "alice", "bob", Some(RealmRole::Reader), 2), None)
            .await
            .unwrap();
        let bob: UserId = "bob".parse().unwrap();
        assert_eq!(
            f.realm.get_realms_for_user(&bob).await.unwrap().get(&f.realm_id),
            Some(&RealmRole::Reader)
        );

        f.realm
            .update_roles(grant(f.realm_id, "alice", "bob", None, 3), None)
            .await
            .unwrap();
        assert!(f.realm.get_realms_for_user(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_maintenance_cycle() {
        let f = fixture().await;
        f.realm
            .update_roles(grant(f.realm_id, "alice", "bob", Some(RealmRole::Reader), 2), None)
            .await
            .unwrap();
        let alice = device("alice");
        let participants = |names: &[&str]| -> HashMap<UserId, Vec<u8>> {
            names
                .iter()
                .map(|name| (name.parse().unwrap(), b"rekey".to_vec()))
                .collect()
        };
        let at = Timestamp::from_millis(10);

        // Revision checked before participants.
        assert!(matches!(
            f.realm
                .start_reencryption_maintenance(&alice, &f.realm_id, 3, participants(&["alice"]), at)
                .await,
            Err(RealmError::EncryptionRevisionError(_))
        ));
        assert!(matches!(
            f.realm
                .start_reencryption_maintenance(&alice, &f.realm_id, 2, participants(&["alice"]), at)
                .await,
            Err(RealmError::ParticipantsMismatch(_))
        ));
        assert!(matches!(
            f.realm
                .start_reencryption_maintenance(
                    &alice,
                    &f.realm_id,
                    2,
                    participants(&["alice", "bob", "carol"]),
                    at
                )
                .await,
            Err(RealmError::ParticipantsMismatch(_))
        ));
        assert!(matches!(
            f.realm
                .start_reencryption_maintenance(
                    &device("bob"),
                    &f.realm_id,
                    2,
                    participants(&["alice", "bob"]),
                    at
                )
                .await,
            Err(RealmError::AccessError(_))
        ));

        let mut rx = f.events.subscribe();
        f.realm
            .start_reencryption_maintenance(&alice, &f.realm_id, 2, participants(&["alice", "bob"]), at)
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            BackendEvent::RealmMaintenanceStarted { encryption_revision: 2, .. }
        ));
        assert!(matches!(rx.recv().await.unwrap(), BackendEvent::MessageReceived { .. }));
        assert!(matches!(rx.recv().await.unwrap(), BackendEvent::MessageReceived { .. }));

        assert!(matches!(
            f.realm
                .start_reencryption_maintenance(&alice, &f.realm_id, 2, participants(&["alice", "bob"]), at)
                .await,
            Err(RealmError::InMaintenance(_))
        ));
        assert!(matches!(
            f.realm
                .update_roles(grant(f.realm_id, "alice", "carol", Some(RealmRole::Reader), 11), None)
                .await,
            Err(RealmError::InMaintenance(_))
        ));

        assert!(matches!(
            f.realm.finish_reencryption_maintenance(&alice, &f.realm_id, 3).await,
            Err(RealmError::EncryptionRevisionError(_))
        ));
        // No vlob at all: both revisions count zero.
        f.realm.finish_reencryption_maintenance(&alice, &f.realm_id, 2).await.unwrap();
        assert!(matches!(
            f.realm.finish_reencryption_maintenance(&alice, &f.realm_id, 2).await,
            Err(RealmError::NotInMaintenance(_))
        ));
        let status = f.realm.get_status(&alice, &f.realm_id).await.unwrap();
        assert!(!status.in_maintenance());
        assert_eq!(status.encryption_revision, 2);
    }

    /// Refuses every delivery as if the inbox store were down.
    struct BrokenInbox;

    #[async_trait::async_trait]
    impl MessageSink for BrokenInbox {
        async fn send(
            &self,
            _: &DeviceId,
            _: &UserId,
            _: Timestamp,
            _: Vec<u8>,
        ) -> std::result::Result<(), crate::error::MessageError> {
            Err(StoreError::Task("inbox unavailable".into()).into())
        }
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_refused_before_maintenance() {
        let f = fixture().await;
        let recipients: HashMap<UserId, Vec<u8>> = ["alice", "mallory"]
            .iter()
            .map(|name| (name.parse().unwrap(), b"rekey".to_vec()))
            .collect();
        assert!(matches!(
            f.realm
                .start_reencryption_maintenance(&device("alice"), &f.realm_id, 2, recipients, Timestamp::from_millis(4))
                .await,
            Err(RealmError::ParticipantsMismatch(_))
        ));

        let status = f.realm.get_status(&device("alice"), &f.realm_id).await.unwrap();
        assert!(!status.in_maintenance());
        assert_eq!(status.encryption_revision, 1);
        assert!(f.store.get_messages(&"alice".parse().unwrap(), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_leaves_realm_in_maintenance() {
        let f = fixture().await;
        let realm = RealmComponent::new(
            f.store.clone(),
            f.store.clone(),
            Arc::new(BrokenInbox),
            f.events.clone(),
            Arc::new(RealmLocks::new()),
        );
        let alice = device("alice");
        let only_alice: HashMap<UserId, Vec<u8>> =
            [("alice".parse().unwrap(), b"rekey".to_vec())].into_iter().collect();

        assert!(matches!(
            realm
                .start_reencryption_maintenance(&alice, &f.realm_id, 2, only_alice.clone(), Timestamp::from_millis(4))
                .await,
            Err(RealmError::Store(_))
        ));
        assert!(realm.get_status(&alice, &f.realm_id).await.unwrap().in_maintenance());
        assert!(matches!(
            realm
                .start_reencryption_maintenance(&alice, &f.realm_id, 2, only_alice, Timestamp::from_millis(5))
                .await,
            Err(RealmError::InMaintenance(_))
        ));

        // The cycle can still be completed.
        realm.finish_reencryption_maintenance(&alice, &f.realm_id, 2).await.unwrap();
        assert_eq!(realm.get_status(&alice, &f.realm_id).await.unwrap().encryption_revision, 2);
    }

    #[tokio::test]
    async fn test_revoked_users_are_not_participants() {
        let f = fixture().await;
        f.realm
            .update_roles(grant(f.realm_id, "alice", "bob", Some(RealmRole::Reader), 2), None)
            .await
            .unwrap();
        f.store
            .revoke_user(&"bob".parse().unwrap(), b"revoked", &device("alice"), Timestamp::from_millis(3))
            .await
            .unwrap();

        let only_alice: HashMap<UserId, Vec<u8>> =
            [("alice".parse().unwrap(), b"rekey".to_vec())].into_iter().collect();
        f.realm
            .start_reencryption_maintenance(&device("alice"), &f.realm_id, 2, only_alice, Timestamp::from_millis(4))
            .await
            .unwrap();
    }
}
