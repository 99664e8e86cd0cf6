//! # Coffer Store
//!
//! Server-side persistence for coffer. Provides trait-based interfaces for
//! realms, role logs, vlobs, blocks, users, devices and message inboxes,
//! with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`RealmStore`] - Realms, role grants, vlob atoms and blocks
//! - [`DirectoryStore`] - Users, devices and inboxes
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use coffer_store::{RealmStore, SqliteStore};
//! use coffer_core::RealmId;
//!
//! async fn example() {
//!     let store = SqliteStore::open("coffer.db").unwrap();
//!     let status = store.get_realm_status(&RealmId::new()).await.unwrap();
//!     assert!(status.is_none());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Append-only role log**: grants are never rewritten, revocations are
//!   grants with no role
//! - **Revision buckets**: every vlob atom lives under one encryption
//!   revision, and a reencryption fills the next bucket from the previous one

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    DeviceEntry, DirectoryStore, RealmStats, RealmStore, ReencryptionItem, StoredBlock,
    StoredMessage, UserEntry, VlobAtom,
};
