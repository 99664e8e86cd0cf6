//! Request and response types of the backend RPC surface.
//!
//! Every command answers either with its reply payload or with a
//! [`Rejection`] carrying a [`Status`] discriminator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use coffer_core::{DeviceId, EntryId, RealmStatus, Timestamp};

/// Stable, machine-readable outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    NotFound,
    NotAllowed,
    AlreadyExists,
    InMaintenance,
    NotInMaintenance,
    BadVersion,
    BadTimestamp,
    BadEncryptionRevision,
    ParticipantsMismatch,
    MaintenanceError,
    IncompatibleProfile,
    RoleAlreadyGranted,
    InvalidCertification,
    InvalidData,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "not_found",
            Self::NotAllowed => "not_allowed",
            Self::AlreadyExists => "already_exists",
            Self::InMaintenance => "in_maintenance",
            Self::NotInMaintenance => "not_in_maintenance",
            Self::BadVersion => "bad_version",
            Self::BadTimestamp => "bad_timestamp",
            Self::BadEncryptionRevision => "bad_encryption_revision",
            Self::ParticipantsMismatch => "participants_mismatch",
            Self::MaintenanceError => "maintenance_error",
            Self::IncompatibleProfile => "incompatible_profile",
            Self::RoleAlreadyGranted => "role_already_granted",
            Self::InvalidCertification => "invalid_certification",
            Self::InvalidData => "invalid_data",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command refused by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub status: Status,
    pub reason: String,
}

impl Rejection {
    pub fn new(status: Status, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "`{}`", self.status)
        } else {
            write!(f, "`{}`: {}", self.status, self.reason)
        }
    }
}

/// Reply of `vlob_read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlobReadRep {
    pub version: u64,
    pub blob: Vec<u8>,
    pub author: DeviceId,
    pub timestamp: Timestamp,
}

/// Reply of `vlob_list_versions`: version -> (timestamp, author).
pub type VlobVersions = BTreeMap<u64, (Timestamp, DeviceId)>;

/// One vlob version moved between encryption revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReencryptionBatchEntry {
    pub entry_id: EntryId,
    pub version: u64,
    pub blob: Vec<u8>,
}

/// Reply of `vlob_maintenance_save_reencryption_batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReencryptionProgress {
    pub total: u64,
    pub done: u64,
}

impl ReencryptionProgress {
    pub fn is_complete(&self) -> bool {
        self.done == self.total
    }
}

/// Reply of `realm_status`.
pub type RealmStatusRep = RealmStatus;

/// Reply of `realm_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealmStatsRep {
    pub blocks_size: u64,
    pub vlobs_size: u64,
}

/// Reply of `user_get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserGetRep {
    pub user_certificate: Vec<u8>,
    pub revoked_user_certificate: Option<Vec<u8>>,
    pub device_certificates: Vec<Vec<u8>>,
}

/// A message read back from the authenticated user's inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRep {
    pub count: u64,
    pub sender: DeviceId,
    pub timestamp: Timestamp,
    pub body: Vec<u8>,
}
