//! Strong type definitions for coffer.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CoreError;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self(bytes)
            }

            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, CoreError> {
                let bytes = hex::decode(s).map_err(|e| CoreError::InvalidId(e.to_string()))?;
                Self::try_from(bytes.as_slice())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = CoreError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; 16] = slice.try_into().map_err(|_| {
                    CoreError::InvalidId(format!("{} must be 16 bytes", stringify!($name)))
                })?;
                Ok(Self(arr))
            }
        }
    };
}

opaque_id!(
    /// Identifier of an access-controlled workspace.
    RealmId
);
opaque_id!(
    /// Identifier of a versioned entry (a manifest's vlob).
    EntryId
);
opaque_id!(
    /// Identifier of an immutable encrypted block.
    BlockId
);

fn validate_name(kind: &str, s: &str) -> Result<(), CoreError> {
    let ok = !s.is_empty()
        && s.len() <= 32
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidId(format!("invalid {}: {:?}", kind, s)))
    }
}

/// Organization identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrganizationId(String);

impl OrganizationId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        validate_name("organization id", &s)?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrganizationId({})", self.0)
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// User identifier, unique within an organization.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        validate_name("user id", &s)?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the identifier of one of this user's devices.
    pub fn to_device_id(&self, device_name: &str) -> Result<DeviceId, CoreError> {
        DeviceId::new(self.clone(), device_name)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Device identifier, written `user@device`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId {
    user_id: UserId,
    device_name: String,
}

impl DeviceId {
    pub fn new(user_id: UserId, device_name: impl Into<String>) -> Result<Self, CoreError> {
        let device_name = device_name.into();
        validate_name("device name", &device_name)?;
        Ok(Self {
            user_id,
            device_name,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.device_name)
    }
}

impl FromStr for DeviceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, device) = s
            .split_once('@')
            .ok_or_else(|| CoreError::InvalidId(format!("invalid device id: {:?}", s)))?;
        Self::new(UserId::new(user)?, device)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self(millis)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    pub const fn add_millis(&self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Whether both timestamps are within `tolerance_ms` of each other.
    pub fn in_ballpark(&self, other: Timestamp, tolerance_ms: i64) -> bool {
        (self.0 - other.0).abs() <= tolerance_ms
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Profile of a user within its organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UserProfile {
    Admin = 1,
    Standard = 2,
    Outsider = 3,
}

impl UserProfile {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Admin),
            2 => Some(Self::Standard),
            3 => Some(Self::Outsider),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Standard => "STANDARD",
            Self::Outsider => "OUTSIDER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realm_id_hex_roundtrip() {
        let id = RealmId::from_bytes([0x42; 16]);
        let recovered = RealmId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_ids_are_random() {
        assert_ne!(EntryId::new(), EntryId::new());
    }

    #[test]
    fn test_id_debug() {
        let id = BlockId::from_bytes([0xcd; 16]);
        assert_eq!(format!("{:?}", id), "BlockId(cdcdcdcd)");
    }

    #[test]
    fn test_device_id_parse() {
        let device: DeviceId = "alice@laptop".parse().unwrap();
        assert_eq!(device.user_id().as_str(), "alice");
        assert_eq!(device.device_name(), "laptop");
        assert_eq!(device.to_string(), "alice@laptop");

        assert!("alice".parse::<DeviceId>().is_err());
        assert!("alice@".parse::<DeviceId>().is_err());
        assert!("a@b@c".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_user_id_rejects_separator() {
        assert!(UserId::new("bob@home").is_err());
        assert!(UserId::new("").is_err());
        assert!(UserId::new("bob").is_ok());
    }

    #[test]
    fn test_timestamp_ballpark() {
        let t = Timestamp::from_millis(1_000_000);
        assert!(t.in_ballpark(t.add_millis(30_000), 30_000));
        assert!(t.in_ballpark(t.add_millis(-30_000), 30_000));
        assert!(!t.in_ballpark(t.add_millis(30_001), 30_000));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_device_id_display_parses_back(
                user in "[a-zA-Z0-9_.-]{1,32}",
                device in "[a-zA-Z0-9_.-]{1,32}",
            ) {
                let device_id = UserId::new(user).unwrap().to_device_id(&device).unwrap();
                let parsed: DeviceId = device_id.to_string().parse().unwrap();
                prop_assert_eq!(parsed, device_id);
            }

            #[test]
            fn test_ballpark_is_symmetric(
                a in -1_000_000_000i64..1_000_000_000,
                b in -1_000_000_000i64..1_000_000_000,
                tolerance in 0i64..100_000,
            ) {
                let (a, b) = (Timestamp::from_millis(a), Timestamp::from_millis(b));
                prop_assert_eq!(a.in_ballpark(b, tolerance), b.in_ballpark(a, tolerance));
            }

            #[test]
            fn test_entry_id_hex(bytes in any::<[u8; 16]>()) {
                let id = EntryId::from_bytes(bytes);
                prop_assert_eq!(EntryId::from_hex(&id.to_hex()).unwrap(), id);
            }
        }
    }
}
