//! # Coffer Backend
//!
//! The server side of coffer: the organization directory, the realm role
//! authority, the reencryption maintenance state machine, vlob and block
//! storage, and user inboxes.
//!
//! ## Overview
//!
//! - **Roles**: [`RealmComponent`] is the single source of truth on who
//!   holds which role on a realm. Role changes are serialized per realm.
//! - **Maintenance**: a realm moves `NORMAL -> IN_MAINTENANCE(r + 1) ->
//!   NORMAL(r + 1)`. Finishing requires every vlob version to have been
//!   reencrypted under the new revision.
//! - **Events**: components publish [`BackendEvent`]s on an injected
//!   [`EventBus`]; nothing is global.
//! - **Commands**: [`AuthenticatedCmds`] answers the client command surface
//!   ([`coffer_sync::BackendCmds`]) in-process, for one registered device.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use coffer_backend::{Backend, BackendConfig};
//! use coffer_backend::core::{DeviceId, SigningKey};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let root_key = SigningKey::generate();
//!     let config = BackendConfig::from_db_url("coffer.sqlite")?;
//!     let backend = Backend::open(config, root_key.verify_key())?;
//!
//!     // Users and devices are registered through `backend.user()`, then:
//!     let device_id: DeviceId = "alice@laptop".parse()?;
//!     let cmds = backend.connect(&device_id).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `coffer_backend::core` - Identifiers, keys and certificates
//! - `coffer_backend::perms` - Encryption, roles and trustchains
//! - `coffer_backend::store` - Store traits, memory and SQLite stores
//! - `coffer_backend::sync` - Client command surface and remote loader

pub mod backend;
pub mod block;
pub mod cmds;
pub mod config;
pub mod error;
pub mod events;
pub mod locks;
pub mod message;
pub mod realm;
pub mod user;
pub mod vlob;

// Re-export component crates
pub use coffer_core as core;
pub use coffer_perms as perms;
pub use coffer_store as store;
pub use coffer_sync as sync;

pub use backend::Backend;
pub use block::BlockComponent;
pub use cmds::AuthenticatedCmds;
pub use config::{BackendConfig, DbConfig, MOCKED_DB_URL};
pub use error::{
    BackendError, BlockError, MessageError, RealmError, Result, UserError, VlobError,
};
pub use events::{BackendEvent, EventBus};
pub use locks::RealmLocks;
pub use message::{MessageComponent, MessageSink};
pub use realm::RealmComponent;
pub use user::{UserComponent, UserPage};
pub use vlob::VlobComponent;
