//! Store trait: the abstract interface for community persistence.
//!
//! Everything is keyed by `(CommunityId, entity, id)`. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::fmt;

use async_trait::async_trait;
use cohort_core::{
    ChatId, CommunityId, Digest, KeyId, PublicKey, RequestId, RequestState, RequestToJoin,
    RevealedAccount, SignedDescription,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Result of appending a description to the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// The description was recorded.
    Inserted,
    /// The same description is already recorded at this clock.
    AlreadyExists,
    /// A different description is recorded at this clock.
    Conflict {
        /// Digest of the recorded description.
        existing: Digest,
    },
}

/// A community as persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityRecord {
    pub id: CommunityId,
    /// Latest accepted description.
    pub description: SignedDescription,
    pub clock: u64,
    /// Community key seed. Present only on the control node.
    pub private_key: Option<[u8; 32]>,
    /// Whether the local identity is a member.
    pub joined: bool,
}

/// A community or channel key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    pub community_id: CommunityId,
    /// `None` for the community key.
    pub chat_id: Option<ChatId>,
    pub key_id: KeyId,
    pub key: [u8; 32],
    /// Unix seconds.
    pub created_at: u64,
}

impl fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKey")
            .field("community_id", &self.community_id)
            .field("chat_id", &self.chat_id)
            .field("key_id", &self.key_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Delivery progress of one key to one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryState {
    Pending,
    Sent,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryState::Pending),
            "sent" => Some(DeliveryState::Sent),
            _ => None,
        }
    }
}

/// Per-recipient key delivery marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMarker {
    pub community_id: CommunityId,
    pub key_id: KeyId,
    pub recipient: PublicKey,
    pub state: DeliveryState,
    /// Unix seconds.
    pub updated_at: u64,
}

/// The Store trait: async interface for community persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, `spawn_blocking` keeps queries off the runtime threads.
///
/// # Design Notes
///
/// - **History is append-only**: appending the same description twice returns
///   `AlreadyExists`; a different one at the same clock returns `Conflict`.
/// - **Requests carry their accounts**: revealed accounts are saved and loaded
///   together with the request they were revealed in.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Communities
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a community record.
    async fn save_community(&self, record: &CommunityRecord) -> Result<()>;

    async fn get_community(&self, id: &CommunityId) -> Result<Option<CommunityRecord>>;

    async fn list_communities(&self) -> Result<Vec<CommunityId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Description history
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a description at `clock`.
    async fn append_description(
        &self,
        community: &CommunityId,
        clock: u64,
        description: &SignedDescription,
    ) -> Result<InsertResult>;

    async fn get_description_at(
        &self,
        community: &CommunityId,
        clock: u64,
    ) -> Result<Option<SignedDescription>>;

    /// Recorded clocks, ascending.
    async fn description_clocks(&self, community: &CommunityId) -> Result<Vec<u64>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Requests to join
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a request together with its revealed accounts.
    async fn save_request(&self, request: &RequestToJoin) -> Result<()>;

    async fn get_request(&self, id: &RequestId) -> Result<Option<RequestToJoin>>;

    /// Requests of a community, optionally filtered by state, ordered by clock.
    async fn list_requests(
        &self,
        community: &CommunityId,
        state: Option<RequestState>,
    ) -> Result<Vec<RequestToJoin>>;

    /// Returns false if the request did not exist.
    async fn delete_request(&self, id: &RequestId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Encryption keys
    // ─────────────────────────────────────────────────────────────────────────

    async fn save_key(&self, key: &StoredKey) -> Result<()>;

    async fn get_key(&self, key_id: &KeyId) -> Result<Option<StoredKey>>;

    /// The most recently created key for the community (`chat = None`) or a channel.
    async fn latest_key(
        &self,
        community: &CommunityId,
        chat: Option<&ChatId>,
    ) -> Result<Option<StoredKey>>;

    /// Drop every key of the community or of one channel. Returns how many.
    async fn delete_keys(&self, community: &CommunityId, chat: Option<&ChatId>) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Key delivery
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or update the marker for `(key_id, recipient)`.
    async fn mark_delivery(&self, marker: &DeliveryMarker) -> Result<()>;

    /// Markers still in [`DeliveryState::Pending`].
    async fn pending_deliveries(&self, community: &CommunityId) -> Result<Vec<DeliveryMarker>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Members reevaluation
    // ─────────────────────────────────────────────────────────────────────────

    /// Record when reevaluation last ran (Unix ms).
    async fn set_last_reevaluation(&self, community: &CommunityId, at: i64) -> Result<()>;

    async fn last_reevaluation(&self, community: &CommunityId) -> Result<Option<i64>>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Append the record's description to the history and save the record.
    ///
    /// The record is not saved when the history holds a different
    /// description at the same clock.
    fn commit_community(
        &self,
        record: &CommunityRecord,
    ) -> impl std::future::Future<Output = Result<InsertResult>> + Send;

    /// Accounts `member` revealed to `community`.
    fn revealed_accounts(
        &self,
        community: &CommunityId,
        member: &PublicKey,
    ) -> impl std::future::Future<Output = Result<Vec<RevealedAccount>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn commit_community(&self, record: &CommunityRecord) -> Result<InsertResult> {
        let result = self
            .append_description(&record.id, record.clock, &record.description)
            .await?;
        if !matches!(result, InsertResult::Conflict { .. }) {
            self.save_community(record).await?;
        }
        Ok(result)
    }

    async fn revealed_accounts(
        &self,
        community: &CommunityId,
        member: &PublicKey,
    ) -> Result<Vec<RevealedAccount>> {
        Ok(self
            .get_request(&RequestId::derive(member, community))
            .await?
            .map(|request| request.revealed_accounts)
            .unwrap_or_default())
    }
}
