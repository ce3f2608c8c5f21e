//! # Cohort Permissions
//!
//! Token-gated permission evaluation and encryption key distribution.
//!
//! ## Overview
//!
//! Communities gate membership, privileged roles and channel access on token
//! holdings. This crate decides who satisfies which gate and what that means
//! for the symmetric keys protecting community and channel traffic.
//!
//! ## Key Concepts
//!
//! - **BalanceSnapshot**: point-in-time holdings supplied by a [`BalanceProvider`]
//! - **PermissionEvaluator**: criteria AND'd inside a permission, permissions
//!   of one type OR'd together
//! - **ReevaluationPlan**: the membership delta computed outside the
//!   community lock and applied under it
//! - **EncryptionKeyActions**: what to do with each key after a membership change
//! - **WrappedKey**: a symmetric key encrypted for one member via X25519
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cohort_perms::{
//!     compute_key_actions, plan_reevaluation, AccountChains, BalanceSnapshot,
//!     MembershipView, PermissionEvaluator,
//! };
//!
//! // let evaluator = PermissionEvaluator::default();
//! // let plan = plan_reevaluation(&evaluator, &description, &local, &accounts, &snapshot);
//! // let before = MembershipView::of(&description);
//! // plan.apply(&mut description);
//! // let actions = compute_key_actions(&before, &MembershipView::of(&description));
//! ```

pub mod balances;
pub mod crypto;
pub mod error;
pub mod evaluator;
pub mod keys;
pub mod keyshare;
pub mod reevaluate;

pub use balances::{contracts_of, BalanceProvider, BalanceSnapshot, StaticBalances};
pub use crypto::{
    EncryptionKey, EncryptionNonce, EphemeralKeyPair, SharedKey, X25519PublicKey,
    X25519StaticSecret,
};
pub use error::{PermsError, Result};
pub use evaluator::{
    accounts_of, AccountChains, ChannelPermissionsResponse, CheckPermissionsResponse,
    CriteriaEvaluation, CriterionResult, Erc20Aggregation, EvaluatorConfig, PermissionEvaluator,
    PermissionResult, ENS_CHAIN_ID,
};
pub use keys::{
    compute_key_action, compute_key_actions, ChannelView, EncryptionKeyAction,
    EncryptionKeyActions, KeyActionType, MembershipView,
};
pub use keyshare::{KeyScope, WrappedKey};
pub use reevaluate::{plan_reevaluation, ReevaluationPlan};
