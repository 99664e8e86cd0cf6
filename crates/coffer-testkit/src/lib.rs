//! # Coffer Testkit
//!
//! Testing utilities for coffer.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an [`Organization`] (backend + root key) issuing real,
//!   signed user, device, role and revocation certificates
//! - **Generators**: Proptest strategies for role changes and identifiers
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use coffer_testkit::Organization;
//! use coffer_core::UserProfile;
//!
//! async fn example() {
//!     let org = Organization::new();
//!     let alice = org.bootstrap_user("alice", UserProfile::Admin).await.unwrap();
//!     let bob = org.new_user(&alice, "bob", UserProfile::Standard).await.unwrap();
//!     let cmds = org.connect(&bob).await.unwrap();
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use coffer_testkit::generators::role_ops;
//!
//! proptest! {
//!     #[test]
//!     fn roles_fold_consistently(ops in role_ops(4, 32)) {
//!         // replay `ops` against a realm...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{Organization, TestLoader};
pub use generators::{role_ops, RoleOp};
