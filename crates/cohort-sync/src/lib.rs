//! # Cohort Sync
//!
//! Wire messages, transport and the community event stream.
//!
//! ## Overview
//!
//! Community members talk over a gossip transport with no guaranteed
//! request/response semantics. This crate defines what travels on it and
//! how local callers wait for the effects of remote messages.
//!
//! ## Key Concepts
//!
//! - **SignedEnvelope**: a canonical CBOR [`ProtocolMessage`] signed by its sender
//! - **Transport**: delivery of envelopes, with an in-memory network for tests
//! - **EventBus**: bounded per-subscriber channels with predicate waits
//! - **PrivilegedSync**: requests to join replicated to privileged members,
//!   checked entry by entry against the local record
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cohort_sync::{CommunityEvent, EventBus, DEFAULT_WAIT_TIMEOUT};
//!
//! async fn example() {
//!     // let bus = EventBus::default();
//!     // let mut sub = bus.subscribe(community_id);
//!     // let event = sub
//!     //     .wait_for(DEFAULT_WAIT_TIMEOUT, |e| matches!(e, CommunityEvent::MemberKicked { .. }))
//!     //     .await?;
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Requester                         Control node                 TokenMaster
//!   |-- RequestToJoin ---------------->|                              |
//!   |                                  |-- PrivilegedUserSync ------->|
//!   |<- RequestToJoinResponse ---------|                              |
//!   |<- Description (broadcast) -------|---------------------------->|
//!   |<- EncryptionKeys ----------------|                              |
//! ```

pub mod convergence;
pub mod envelope;
pub mod error;
pub mod events;
pub mod messages;
pub mod privileged;
pub mod transport;

pub use convergence::{
    compare_descriptions, verify_all_communities, verify_convergence, ConvergenceResult,
};
pub use envelope::{SignedEnvelope, ENVELOPE_CONTEXT};
pub use error::{Result, SyncError};
pub use events::{
    CommunityEvent, EventBus, Subscription, SubscriptionId, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_WAIT_TIMEOUT,
};
pub use messages::{limits, NodeId, ProtocolMessage, PROTOCOL_VERSION};
pub use privileged::{
    check_sync_entry, validate_privileged_sync, PrivilegedSync, PrivilegedSyncKind,
    SyncEntryVerdict,
};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
