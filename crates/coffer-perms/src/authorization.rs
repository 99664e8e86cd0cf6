//! Who may change whose realm role.

use coffer_core::RealmRole;

/// The set of roles allowed to perform a role change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredTier {
    OwnerOnly,
    OwnerOrManager,
}

impl RequiredTier {
    pub fn allows(self, granter: Option<RealmRole>) -> bool {
        match (self, granter) {
            (_, None) => false,
            (RequiredTier::OwnerOnly, Some(role)) => role == RealmRole::Owner,
            (RequiredTier::OwnerOrManager, Some(role)) => role.is_privileged(),
        }
    }
}

/// Tier needed to move a user from `existing` to `new`.
///
/// Touching OWNER or MANAGER, on either side of the change, is owner-only.
pub fn required_tier(existing: Option<RealmRole>, new: Option<RealmRole>) -> RequiredTier {
    let privileged = |role: Option<RealmRole>| role.map_or(false, RealmRole::is_privileged);
    if privileged(existing) || privileged(new) {
        RequiredTier::OwnerOnly
    } else {
        RequiredTier::OwnerOrManager
    }
}

/// Whether `granter` may move a user from `existing` to `new`.
pub fn can_update_role(
    granter: Option<RealmRole>,
    existing: Option<RealmRole>,
    new: Option<RealmRole>,
) -> bool {
    required_tier(existing, new).allows(granter)
}
