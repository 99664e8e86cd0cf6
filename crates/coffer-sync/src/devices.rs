//! Verified lookup of remote users and devices.

use std::sync::Arc;

use async_trait::async_trait;

use coffer_core::{
    Certificate, DeviceCertificate, DeviceId, RevokedUserCertificate, UserCertificate, UserId,
    VerifyKey,
};
use coffer_perms::{CertificateSource, TrustchainError, TrustchainVerifier, UserRecord};

use crate::messages::Status;
use crate::transport::{BackendCmds, CmdError};

type Result<T> = std::result::Result<T, TrustchainError>;

fn lookup_error(e: CmdError, not_found: impl FnOnce() -> TrustchainError) -> TrustchainError {
    match e {
        CmdError::NotAvailable(msg) => TrustchainError::BackendOffline(msg),
        CmdError::Rejected(rejection) if rejection.status == Status::NotFound => not_found(),
        CmdError::Rejected(rejection) => {
            TrustchainError::InvalidTrustchain(format!("lookup rejected: {}", rejection))
        }
    }
}

/// Fetches certificates through the backend commands.
pub struct BackendCertificateSource<C> {
    cmds: Arc<C>,
}

#[async_trait]
impl<C: BackendCmds> CertificateSource for BackendCertificateSource<C> {
    async fn fetch_user(&self, user_id: &UserId) -> Result<UserRecord> {
        let rep = self
            .cmds
            .user_get(user_id)
            .await
            .map_err(|e| lookup_error(e, || TrustchainError::UserNotFound(user_id.clone())))?;
        Ok(UserRecord {
            user_certificate: rep.user_certificate,
            revoked_user_certificate: rep.revoked_user_certificate,
        })
    }

    async fn fetch_device(&self, device_id: &DeviceId) -> Result<Vec<u8>> {
        self.cmds
            .device_get(device_id)
            .await
            .map_err(|e| lookup_error(e, || TrustchainError::DeviceNotFound(device_id.clone())))
    }
}

/// Resolves remote identities, verifying each one's trustchain up to the
/// organization root key.
pub struct RemoteDevicesManager<C> {
    verifier: TrustchainVerifier<BackendCertificateSource<C>>,
}

impl<C: BackendCmds> RemoteDevicesManager<C> {
    pub fn new(cmds: Arc<C>, root_verify_key: VerifyKey) -> Self {
        Self {
            verifier: TrustchainVerifier::new(BackendCertificateSource { cmds }, root_verify_key),
        }
    }

    pub async fn get_device(&self, device_id: &DeviceId, no_cache: bool) -> Result<DeviceCertificate> {
        Ok(self.verifier.resolve(device_id, no_cache).await?.device)
    }

    pub async fn get_user(
        &self,
        user_id: &UserId,
        no_cache: bool,
    ) -> Result<(UserCertificate, Option<RevokedUserCertificate>)> {
        let verified = self.verifier.resolve_user(user_id, no_cache).await?;
        Ok((verified.user, verified.revoked_user))
    }

    /// A user and all of its devices, each verified.
    pub async fn get_user_and_devices(
        &self,
        user_id: &UserId,
        no_cache: bool,
    ) -> Result<(
        UserCertificate,
        Option<RevokedUserCertificate>,
        Vec<DeviceCertificate>,
    )> {
        let (user, revoked_user) = self.get_user(user_id, no_cache).await?;
        let rep = self
            .verifier
            .source()
            .cmds
            .user_get(user_id)
            .await
            .map_err(|e| lookup_error(e, || TrustchainError::UserNotFound(user_id.clone())))?;

        let mut devices = Vec::with_capacity(rep.device_certificates.len());
        for raw in &rep.device_certificates {
            let unsecure = DeviceCertificate::unsecure_load(raw)
                .map_err(|e| TrustchainError::InvalidTrustchain(e.to_string()))?;
            if unsecure.device_id.user_id() != user_id {
                return Err(TrustchainError::InvalidTrustchain(format!(
                    "device `{}` listed under user `{}`",
                    unsecure.device_id, user_id
                )));
            }
            devices.push(self.get_device(&unsecure.device_id, no_cache).await?);
        }
        Ok((user, revoked_user, devices))
    }
}
