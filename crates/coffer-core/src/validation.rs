//! Semantic checks on realm role certificates.

use crate::certificate::RealmRoleCertificate;
use crate::error::ValidationError;
use crate::realm::RealmRole;
use crate::types::Timestamp;

/// Default tolerance between a certificate timestamp and the local clock.
pub const DEFAULT_BALLPARK_MS: i64 = 30_000;

/// Validate the certificate that creates a realm.
///
/// It must:
/// - have an author
/// - grant `OWNER`
/// - be self-signed (author's user is the target user)
pub fn validate_realm_root_certificate(
    certif: &RealmRoleCertificate,
) -> Result<(), ValidationError> {
    let author = certif.author.as_ref().ok_or(ValidationError::MissingAuthor)?;

    if certif.role != Some(RealmRole::Owner) {
        return Err(ValidationError::RootMustBeOwner);
    }

    if author.user_id() != &certif.user_id {
        return Err(ValidationError::RootMustBeSelfSigned);
    }

    Ok(())
}

/// Validate a role grant or revocation issued on an existing realm.
pub fn validate_role_update_certificate(
    certif: &RealmRoleCertificate,
) -> Result<(), ValidationError> {
    let author = certif.author.as_ref().ok_or(ValidationError::MissingAuthor)?;

    if author.user_id() == &certif.user_id {
        return Err(ValidationError::CannotUpdateOwnRole);
    }

    Ok(())
}

/// Check a timestamp against the local clock.
pub fn validate_timestamp(
    now: Timestamp,
    timestamp: Timestamp,
    tolerance_ms: i64,
) -> Result<(), ValidationError> {
    if now.in_ballpark(timestamp, tolerance_ms) {
        Ok(())
    } else {
        Err(ValidationError::TimestampOutOfBallpark {
            now: now.as_millis(),
            got: timestamp.as_millis(),
        })
    }
}
