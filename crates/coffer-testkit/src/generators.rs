//! Proptest generators for property-based testing.

use proptest::prelude::*;

use coffer_core::{EntryId, RealmId, RealmRole, Timestamp, UserId};

/// Generate a realm role.
pub fn realm_role() -> impl Strategy<Value = RealmRole> {
    prop_oneof![
        Just(RealmRole::Owner),
        Just(RealmRole::Manager),
        Just(RealmRole::Contributor),
        Just(RealmRole::Reader),
    ]
}

/// Generate a role change: a role, or its removal.
pub fn role_change() -> impl Strategy<Value = Option<RealmRole>> {
    prop_oneof![
        1 => Just(None),
        4 => realm_role().prop_map(Some),
    ]
}

/// Generate a random RealmId.
pub fn realm_id() -> impl Strategy<Value = RealmId> {
    any::<[u8; 16]>().prop_map(RealmId::from_bytes)
}

/// Generate a random EntryId.
pub fn entry_id() -> impl Strategy<Value = EntryId> {
    any::<[u8; 16]>().prop_map(EntryId::from_bytes)
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (0i64..=4_000_000_000_000).prop_map(Timestamp::from_millis)
}

/// Name of the `index`-th user of a generated scenario.
pub fn user_name(index: usize) -> String {
    format!("user{}", index)
}

pub fn user_id(index: usize) -> UserId {
    match user_name(index).parse() {
        Ok(user_id) => user_id,
        Err(e) => panic!("generated user id is invalid: {}", e),
    }
}

/// One attempted role change between users of a scenario.
///
/// User 0 is the realm creator, hence its first owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleOp {
    pub granter: usize,
    pub target: usize,
    pub role: Option<RealmRole>,
}

/// Generate a sequence of role changes between `users` users.
///
/// Many of them are expected to be rejected: granters without the right,
/// self-changes, identical re-grants.
pub fn role_ops(users: usize, max_len: usize) -> impl Strategy<Value = Vec<RoleOp>> {
    let users = users.max(1);
    prop::collection::vec(
        (0..users, 0..users, role_change()).prop_map(|(granter, target, role)| RoleOp {
            granter,
            target,
            role,
        }),
        0..=max_len,
    )
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}
