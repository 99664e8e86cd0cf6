//! Client side of a realm reencryption: moves every vlob version from the
//! previous encryption revision to the new one, batch by batch.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{translate_cmd_error, FsError, Result};
use crate::messages::{ReencryptionBatchEntry, ReencryptionProgress, Status};
use crate::transport::{BackendCmds, CmdError};
use crate::types::WorkspaceEntry;

/// A running reencryption, from `old` to `new` workspace keys.
pub struct ReencryptionJob<C> {
    cmds: Arc<C>,
    old: WorkspaceEntry,
    new: WorkspaceEntry,
}

impl<C> fmt::Debug for ReencryptionJob<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReencryptionJob")
            .field("realm_id", &self.new.realm_id)
            .field("from", &self.old.encryption_revision)
            .field("to", &self.new.encryption_revision)
            .finish_non_exhaustive()
    }
}

impl<C: BackendCmds> ReencryptionJob<C> {
    pub fn new(cmds: Arc<C>, old: WorkspaceEntry, new: WorkspaceEntry) -> Self {
        Self { cmds, old, new }
    }

    pub fn new_workspace_entry(&self) -> &WorkspaceEntry {
        &self.new
    }

    /// Re-encrypt up to `size` vlob versions not yet moved.
    pub async fn do_one_batch(&self, size: usize) -> Result<ReencryptionProgress> {
        let realm_id = self.new.realm_id;
        let revision = self.new.encryption_revision;
        let map_rejection = |e: CmdError| {
            translate_cmd_error(e, |rejection| match rejection.status {
                Status::NotAllowed => FsError::NoWriteAccess("cannot reencrypt realm".into()),
                Status::NotInMaintenance => FsError::Other("realm is not in maintenance".into()),
                Status::BadEncryptionRevision => FsError::BadEncryptionRevision(format!(
                    "cannot reencrypt to revision {}",
                    revision
                )),
                _ => FsError::Other(format!("cannot reencrypt realm: {}", rejection)),
            })
        };

        let batch = self
            .cmds
            .vlob_maintenance_get_reencryption_batch(&realm_id, revision, size)
            .await
            .map_err(map_rejection)?;

        let mut reencrypted = Vec::with_capacity(batch.len());
        for item in batch {
            let clear = self
                .old
                .key
                .decrypt(&item.blob)
                .map_err(|e| FsError::InvalidData(format!("cannot decrypt vlob: {}", e)))?;
            let blob = self
                .new
                .key
                .encrypt(&clear)
                .map_err(|e| FsError::InvalidData(format!("cannot encrypt vlob: {}", e)))?;
            reencrypted.push(ReencryptionBatchEntry { blob, ..item });
        }

        let progress = self
            .cmds
            .vlob_maintenance_save_reencryption_batch(&realm_id, revision, reencrypted)
            .await
            .map_err(map_rejection)?;
        debug!(
            realm_id = %realm_id,
            done = progress.done,
            total = progress.total,
            "reencryption batch saved"
        );
        Ok(progress)
    }

    /// Run batches until every vlob version has been moved.
    pub async fn run_to_completion(&self, batch_size: usize) -> Result<ReencryptionProgress> {
        let mut last = None;
        loop {
            let progress = self.do_one_batch(batch_size).await?;
            if progress.is_complete() {
                return Ok(progress);
            }
            if last == Some(progress) {
                return Err(FsError::Other(format!(
                    "reencryption stalled at {}/{}",
                    progress.done, progress.total
                )));
            }
            last = Some(progress);
        }
    }
}
