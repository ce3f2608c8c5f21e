//! # Cohort Testkit
//!
//! Testing utilities for Cohort.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: in-memory networks of managers sharing one balance provider
//! - **Generators**: Proptest strategies for descriptions and edit sequences
//!
//! ## Test Networks
//!
//! Every node of a [`TestNetwork`] runs a manager over a memory store and a
//! memory transport. Nothing is delivered until [`pump`] runs the inbound
//! loops:
//!
//! ```rust,no_run
//! use cohort::core::{AccessPolicy, AccessSettings, CommunityIdentity};
//! use cohort_testkit::{pump, TestNetwork};
//!
//! # async fn example() -> cohort::Result<()> {
//! let network = TestNetwork::new();
//! let owner = network.node().await;
//! let alice = network.node().await;
//!
//! let access = AccessSettings { policy: AccessPolicy::AutoAccept, ..Default::default() };
//! let community = owner.manager.create_community(CommunityIdentity::named("demo"), access).await?;
//! alice.manager.spectate_community(community.signed.clone()).await?;
//! alice.manager.request_to_join(&community.id(), vec![alice.reveal(&community.id())], None, None).await?;
//! pump(&[&owner, &alice]).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use cohort_testkit::generators::signed_history;
//!
//! proptest! {
//!     #[test]
//!     fn clocks_increase(history in signed_history(8)) {
//!         prop_assert!(history.windows(2).all(|w| w[0].clock < w[1].clock));
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{member_permission, pump, test_contract, tokens, TestManager, TestNetwork, TestNode, Wallet, TEST_CHAIN};
pub use generators::{signed_history, DescriptionEdit, SignedHistory};
