//! # Coffer Sync
//!
//! Client side of coffer: the backend command surface and the remote loader
//! that keeps a workspace's manifests and blocks in sync with the backend.
//!
//! ## Overview
//!
//! The client never trusts the backend with clear-text or with authorship.
//! Manifests and blocks are encrypted with the workspace key; manifests are
//! signed by their author's device, whose identity is proven by a trustchain
//! rooted at the organization key; and the author must have held a writing
//! role on the realm when the manifest was written.
//!
//! ## Key Types
//!
//! - [`BackendCmds`] - Commands of an authenticated device
//! - [`RemoteLoader`] - Fetch, verify and upload manifests and blocks
//! - [`RemoteDevicesManager`] - Verified lookup of users and devices
//! - [`LocalStorage`] - Local cache of manifests and blocks
//! - [`ReencryptionJob`] - Moves a realm's data to a new encryption revision
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use coffer_core::{EntryId, VerifyKey};
//! use coffer_sync::{
//!     BackendCmds, LoaderConfig, LocalDevice, MemoryLocalStorage, RemoteLoader, WorkspaceEntry,
//! };
//!
//! async fn example<C: BackendCmds>(
//!     device: LocalDevice,
//!     workspace: WorkspaceEntry,
//!     cmds: Arc<C>,
//!     root_verify_key: VerifyKey,
//!     entry_id: EntryId,
//! ) {
//!     let loader = RemoteLoader::new(
//!         device,
//!         workspace,
//!         cmds,
//!         root_verify_key,
//!         Arc::new(MemoryLocalStorage::new()),
//!         LoaderConfig::default(),
//!     );
//!     let latest = loader.load_manifest(&entry_id, None, None, None).await.unwrap();
//!     let first = loader.load_manifest(&entry_id, Some(1), None, None).await.unwrap();
//!     assert!(latest.version >= first.version);
//! }
//! ```

pub mod devices;
pub mod error;
pub mod loader;
pub mod local;
pub mod messages;
pub mod reencryption;
pub mod transport;
pub mod types;

pub use devices::{BackendCertificateSource, RemoteDevicesManager};
pub use error::{FsError, Result};
pub use loader::{LoaderConfig, RemoteLoader};
pub use local::{LocalStorage, MemoryLocalStorage};
pub use messages::{
    MessageRep, RealmStatsRep, RealmStatusRep, ReencryptionBatchEntry, ReencryptionProgress,
    Rejection, Status, UserGetRep, VlobReadRep, VlobVersions,
};
pub use reencryption::ReencryptionJob;
pub use transport::{BackendCmds, CmdError, CmdResult};
pub use types::{BlockAccess, LocalDevice, WorkspaceEntry};
