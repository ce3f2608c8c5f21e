//! # Cohort
//!
//! Membership, permissions, key distribution and control node handover for
//! decentralized communities.
//!
//! ## Overview
//!
//! A community is described by a signed, clock-versioned [`Description`]
//! authored by its control node. The [`Manager`] keeps every community the
//! local identity knows about and provides:
//!
//! - **Structure**: communities, chats, categories and token permissions
//! - **Requests to join**: gated by token holdings proven with revealed accounts
//! - **Members**: kicks, bans, role grants and periodic reevaluation
//! - **Keys**: community and channel keys rotated when access is lost
//! - **Handover**: a new control node re-admits members from fresh reveals
//!
//! ## Key Concepts
//!
//! - **Control node**: the one identity allowed to sign structural edits
//! - **Privilege**: the capability lookup every mutating operation consults
//! - **Snapshot**: readers take an `Arc<Community>` and never wait on writers
//! - **Events**: callers wait for remote effects on a [`Subscription`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cohort::{Manager, ManagerConfig};
//! use cohort::core::{AccessSettings, CommunityIdentity, Keypair};
//! use cohort::perms::StaticBalances;
//! use cohort::store::SqliteStore;
//! use cohort::sync::MemoryNetwork;
//!
//! async fn example() -> cohort::Result<()> {
//!     let identity = Keypair::generate();
//!     let store = SqliteStore::open("cohort.db")?;
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(identity.public_key()).await;
//!     let balances = Arc::new(StaticBalances::new([1]));
//!
//!     let manager = Arc::new(Manager::new(identity, store, transport, balances, ManagerConfig::default()));
//!     let community = manager
//!         .create_community(CommunityIdentity::named("rustaceans"), AccessSettings::default())
//!         .await?;
//!     manager.start_members_reevaluation(community.id())?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `cohort::core` - descriptions, permissions, requests and identities
//! - `cohort::store` - storage abstraction and SQLite
//! - `cohort::sync` - wire messages, transport and events
//! - `cohort::perms` - permission evaluation and key distribution

pub mod community;
pub mod config;
pub mod error;
pub mod handover;
pub mod inbound;
pub mod keys;
pub mod manager;
pub mod members;
pub mod reevaluate;
pub mod requests;
pub mod scheduler;
pub mod structure;

pub use cohort_core as core;
pub use cohort_perms as perms;
pub use cohort_store as store;
pub use cohort_sync as sync;

pub use community::Community;
pub use config::{AirdropDefault, ManagerConfig};
pub use error::{ManagerError, Result, RoleViolation};
pub use inbound::ApplyOutcome;
pub use manager::Manager;
pub use scheduler::ExecutionType;

pub use cohort_core::{
    Description, DescriptionChanges, Keypair, MemberRole, Privilege, PublicKey, RequestState,
    RequestToJoin, RevealedAccount,
};
pub use cohort_sync::{CommunityEvent, Subscription};
