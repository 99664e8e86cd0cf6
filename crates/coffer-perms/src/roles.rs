//! Role state computed by replaying a realm's grant log.
//!
//! Grants are folded in ascending timestamp order; a `None` role removes the
//! user. The same fold serves the server (current roles) and the client
//! (role held at a given instant).

use std::collections::HashMap;

use coffer_core::{RealmRole, RoleGrant, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
struct RoleEntry {
    user_id: UserId,
    role: Option<RealmRole>,
    timestamp: Timestamp,
}

/// Timestamp-ordered role log of one realm.
#[derive(Debug, Clone, Default)]
pub struct RoleLog {
    entries: Vec<RoleEntry>,
}

impl RoleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_grants<'a>(grants: impl IntoIterator<Item = &'a RoleGrant>) -> Self {
        let mut log = Self::new();
        for grant in grants {
            log.push(grant.user_id.clone(), grant.role, grant.granted_on);
        }
        log
    }

    /// Insert an entry, keeping timestamp order. Entries sharing a timestamp
    /// keep their insertion order.
    pub fn push(&mut self, user_id: UserId, role: Option<RealmRole>, timestamp: Timestamp) {
        let index = self.entries.partition_point(|e| e.timestamp <= timestamp);
        self.entries.insert(
            index,
            RoleEntry {
                user_id,
                role,
                timestamp,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamp of the most recent entry.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.entries.last().map(|e| e.timestamp)
    }

    /// Fold the whole log into `{user: role}`.
    pub fn current_roles(&self) -> HashMap<UserId, RealmRole> {
        let mut roles = HashMap::new();
        for entry in &self.entries {
            match entry.role {
                Some(role) => {
                    roles.insert(entry.user_id.clone(), role);
                }
                None => {
                    roles.remove(&entry.user_id);
                }
            }
        }
        roles
    }

    /// Current role of one user.
    pub fn role_of(&self, user_id: &UserId) -> Option<RealmRole> {
        self.entries
            .iter()
            .rev()
            .find(|e| &e.user_id == user_id)
            .and_then(|e| e.role)
    }

    /// Role `user_id` held at `at` (entries issued at `at` included).
    pub fn role_at(&self, user_id: &UserId, at: Timestamp) -> Option<RealmRole> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.timestamp <= at)
            .find(|e| &e.user_id == user_id)
            .and_then(|e| e.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user(s: &str) -> UserId {
        s.parse().unwrap()
    }

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn test_revocation_removes_user() {
        let mut log = RoleLog::new();
        log.push(user("alice"), Some(RealmRole::Owner), ts(1));
        log.push(user("bob"), Some(RealmRole::Reader), ts(2));
        log.push(user("bob"), None, ts(3));

        let roles = log.current_roles();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles.get(&user("alice")), Some(&RealmRole::Owner));
        assert_eq!(log.role_of(&user("bob")), None);
    }

    #[test]
    fn test_out_of_order_push_is_sorted() {
        let mut log = RoleLog::new();
        log.push(user("bob"), None, ts(10));
        log.push(user("bob"), Some(RealmRole::Manager), ts(5));

        assert_eq!(log.role_of(&user("bob")), None);
        assert_eq!(log.last_timestamp(), Some(ts(10)));
    }

    #[test]
    fn test_role_at() {
        let mut log = RoleLog::new();
        log.push(user("bob"), Some(RealmRole::Reader), ts(10));
        log.push(user("bob"), Some(RealmRole::Contributor), ts(20));
        log.push(user("bob"), None, ts(30));

        assert_eq!(log.role_at(&user("bob"), ts(9)), None);
        assert_eq!(log.role_at(&user("bob"), ts(10)), Some(RealmRole::Reader));
        assert_eq!(log.role_at(&user("bob"), ts(25)), Some(RealmRole::Contributor));
        assert_eq!(log.role_at(&user("bob"), ts(30)), None);
        assert_eq!(log.role_at(&user("alice"), ts(25)), None);
    }

    fn arb_role() -> impl Strategy<Value = Option<RealmRole>> {
        prop_oneof![
            Just(None),
            Just(Some(RealmRole::Reader)),
            Just(Some(RealmRole::Contributor)),
            Just(Some(RealmRole::Manager)),
            Just(Some(RealmRole::Owner)),
        ]
    }

    proptest! {
        #[test]
        fn prop_fold_matches_per_user_lookup(
            ops in prop::collection::vec((0usize..4, arb_role(), 0i64..50), 0..40)
        ) {
            let users = ["u0", "u1", "u2", "u3"];
            let mut log = RoleLog::new();
            for (u, role, t) in &ops {
                log.push(user(users[*u]), *role, ts(*t));
            }

            let roles = log.current_roles();
            for u in users {
                prop_assert_eq!(roles.get(&user(u)).copied(), log.role_of(&user(u)));
                prop_assert_eq!(log.role_at(&user(u), ts(i64::MAX)), log.role_of(&user(u)));
            }
        }
    }
}
