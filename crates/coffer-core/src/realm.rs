//! Realm roles and maintenance status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::certificate::RealmRoleCertificate;
use crate::error::CoreError;
use crate::types::{DeviceId, RealmId, Timestamp, UserId};

/// Capability level a user holds on a realm.
///
/// Ordered: `Owner > Manager > Contributor > Reader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum RealmRole {
    Reader = 1,
    Contributor = 2,
    Manager = 3,
    Owner = 4,
}

impl RealmRole {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Reader),
            2 => Some(Self::Contributor),
            3 => Some(Self::Manager),
            4 => Some(Self::Owner),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reader => "READER",
            Self::Contributor => "CONTRIBUTOR",
            Self::Manager => "MANAGER",
            Self::Owner => "OWNER",
        }
    }

    /// Whether the role allows writing vlobs and blocks.
    pub fn can_write(self) -> bool {
        self >= Self::Contributor
    }

    /// Whether the role is part of the owner-only management tier.
    pub fn is_privileged(self) -> bool {
        self >= Self::Manager
    }
}

impl fmt::Display for RealmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RealmRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READER" => Ok(Self::Reader),
            "CONTRIBUTOR" => Ok(Self::Contributor),
            "MANAGER" => Ok(Self::Manager),
            "OWNER" => Ok(Self::Owner),
            _ => Err(CoreError::DecodingError(format!("unknown role {:?}", s))),
        }
    }
}

/// Kind of maintenance a realm can be locked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaintenanceType {
    Reencryption,
}

impl MaintenanceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reencryption => "REENCRYPTION",
        }
    }
}

/// Maintenance state of a realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmStatus {
    pub maintenance_type: Option<MaintenanceType>,
    pub maintenance_started_on: Option<Timestamp>,
    pub maintenance_started_by: Option<DeviceId>,
    pub encryption_revision: u64,
}

impl RealmStatus {
    /// Status of a freshly created realm.
    pub fn initial() -> Self {
        Self {
            maintenance_type: None,
            maintenance_started_on: None,
            maintenance_started_by: None,
            encryption_revision: 1,
        }
    }

    pub fn in_maintenance(&self) -> bool {
        self.maintenance_type.is_some()
    }

    /// Status after a reencryption started towards `revision`.
    pub fn start_reencryption(&self, revision: u64, by: DeviceId, on: Timestamp) -> Self {
        Self {
            maintenance_type: Some(MaintenanceType::Reencryption),
            maintenance_started_on: Some(on),
            maintenance_started_by: Some(by),
            encryption_revision: revision,
        }
    }

    /// Status once the running maintenance is over.
    pub fn finish_maintenance(&self) -> Self {
        Self {
            maintenance_type: None,
            maintenance_started_on: None,
            maintenance_started_by: None,
            encryption_revision: self.encryption_revision,
        }
    }
}

/// One entry of a realm's append-only role log.
///
/// `role = None` is a revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub realm_id: RealmId,
    pub user_id: UserId,
    pub role: Option<RealmRole>,
    pub granted_by: Option<DeviceId>,
    pub granted_on: Timestamp,
    /// Signed certificate this grant was built from.
    pub certificate: Vec<u8>,
}

impl RoleGrant {
    pub fn from_certificate(certif: &RealmRoleCertificate, signed: Vec<u8>) -> Self {
        Self {
            realm_id: certif.realm_id,
            user_id: certif.user_id.clone(),
            role: certif.role,
            granted_by: certif.author.clone(),
            granted_on: certif.timestamp,
            certificate: signed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(RealmRole::Owner > RealmRole::Manager);
        assert!(RealmRole::Manager > RealmRole::Contributor);
        assert!(RealmRole::Contributor > RealmRole::Reader);
        assert!(!RealmRole::Reader.can_write());
        assert!(RealmRole::Contributor.can_write());
        assert!(RealmRole::Manager.is_privileged());
        assert!(!RealmRole::Contributor.is_privileged());
    }

    #[test]
    fn test_role_str_roundtrip() {
        for role in [
            RealmRole::Reader,
            RealmRole::Contributor,
            RealmRole::Manager,
            RealmRole::Owner,
        ] {
            assert_eq!(role.as_str().parse::<RealmRole>().unwrap(), role);
            assert_eq!(RealmRole::from_u8(role.as_u8()), Some(role));
        }
        assert!("ADMIN".parse::<RealmRole>().is_err());
    }

    #[test]
    fn test_status_transitions() {
        let status = RealmStatus::initial();
        assert!(!status.in_maintenance());
        assert_eq!(status.encryption_revision, 1);

        let by: DeviceId = "alice@dev1".parse().unwrap();
        let started = status.start_reencryption(2, by.clone(), Timestamp::from_millis(5));
        assert!(started.in_maintenance());
        assert_eq!(started.maintenance_started_by, Some(by));
        assert_eq!(started.encryption_revision, 2);

        let finished = started.finish_maintenance();
        assert!(!finished.in_maintenance());
        assert_eq!(finished.encryption_revision, 2);
    }
}
