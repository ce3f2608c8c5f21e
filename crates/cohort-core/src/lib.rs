//! # Cohort Core
//!
//! Pure primitives for Cohort: identities, community descriptions, token
//! permissions, requests to join and clock-ordered merging.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Description`] - Signed, versioned state of one community
//! - [`Member`] / [`MemberRole`] / [`Privilege`] - Who belongs and what they may do
//! - [`TokenPermission`] / [`TokenCriteria`] - Token gates on roles and channels
//! - [`RequestToJoin`] / [`RevealedAccount`] - Join requests and wallet proofs
//! - [`apply_if_newer`] - The one merge rule for every clocked entity
//!
//! ## Canonicalization
//!
//! Signed and hashed payloads use deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod changes;
pub mod channel;
pub mod clock;
pub mod crypto;
pub mod description;
pub mod error;
pub mod permission;
pub mod request;
pub mod signed;
pub mod types;
pub mod validation;

pub use canonical::{canonical_bytes, canonical_digest, decode};
pub use changes::{ChatMembersChange, DescriptionChanges, RoleChange};
pub use channel::{Category, ChannelRole, Chat, ChatSettings};
pub use clock::{apply_if_newer, is_newer, merge_entities, ClockPolicy, Clocked, Merge};
pub use crypto::{Digest, Keypair, PublicKey, Signature};
pub use description::{
    AccessPolicy, AccessSettings, CommunityIdentity, Description, Member, MemberRole, Privilege,
    Shard,
};
pub use error::{CoreError, DescriptionError};
pub use permission::{PermissionType, TokenCriteria, TokenPermission, TokenType};
pub use request::{RequestState, RequestToJoin, RevealedAccount};
pub use signed::{description_digest, SignedDescription};
pub use types::{Address, CategoryId, ChainId, ChatId, CommunityId, KeyId, PermissionId, RequestId};
pub use validation::validate_description;
