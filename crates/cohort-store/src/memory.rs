//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use cohort_core::{
    ChatId, CommunityId, KeyId, PublicKey, RequestId, RequestState, RequestToJoin,
    SignedDescription,
};

use crate::error::{Result, StoreError};
use crate::traits::{CommunityRecord, DeliveryMarker, DeliveryState, InsertResult, Store, StoredKey};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    communities: BTreeMap<CommunityId, CommunityRecord>,

    /// (community, clock) -> description.
    history: BTreeMap<(CommunityId, u64), SignedDescription>,

    requests: HashMap<RequestId, RequestToJoin>,

    keys: HashMap<KeyId, StoredKey>,

    /// (key, recipient) -> marker.
    deliveries: BTreeMap<(KeyId, PublicKey), DeliveryMarker>,

    reevaluations: HashMap<CommunityId, i64>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_community(&self, record: &CommunityRecord) -> Result<()> {
        self.write()?.communities.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_community(&self, id: &CommunityId) -> Result<Option<CommunityRecord>> {
        Ok(self.read()?.communities.get(id).cloned())
    }

    async fn list_communities(&self) -> Result<Vec<CommunityId>> {
        Ok(self.read()?.communities.keys().copied().collect())
    }

    async fn append_description(
        &self,
        community: &CommunityId,
        clock: u64,
        description: &SignedDescription,
    ) -> Result<InsertResult> {
        let mut inner = self.write()?;
        match inner.history.get(&(*community, clock)) {
            Some(existing) if existing == description => Ok(InsertResult::AlreadyExists),
            Some(existing) => Ok(InsertResult::Conflict {
                existing: existing.digest(),
            }),
            None => {
                inner.history.insert((*community, clock), description.clone());
                Ok(InsertResult::Inserted)
            }
        }
    }

    async fn get_description_at(
        &self,
        community: &CommunityId,
        clock: u64,
    ) -> Result<Option<SignedDescription>> {
        Ok(self.read()?.history.get(&(*community, clock)).cloned())
    }

    async fn description_clocks(&self, community: &CommunityId) -> Result<Vec<u64>> {
        Ok(self
            .read()?
            .history
            .range((*community, 0)..=(*community, u64::MAX))
            .map(|((_, clock), _)| *clock)
            .collect())
    }

    async fn save_request(&self, request: &RequestToJoin) -> Result<()> {
        self.write()?.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: &RequestId) -> Result<Option<RequestToJoin>> {
        Ok(self.read()?.requests.get(id).cloned())
    }

    async fn list_requests(
        &self,
        community: &CommunityId,
        state: Option<RequestState>,
    ) -> Result<Vec<RequestToJoin>> {
        let inner = self.read()?;
        let mut requests: Vec<RequestToJoin> = inner
            .requests
            .values()
            .filter(|r| r.community_id == *community)
            .filter(|r| state.map_or(true, |s| r.state == s))
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.clock, r.id));
        Ok(requests)
    }

    async fn delete_request(&self, id: &RequestId) -> Result<bool> {
        Ok(self.write()?.requests.remove(id).is_some())
    }

    async fn save_key(&self, key: &StoredKey) -> Result<()> {
        self.write()?.keys.insert(key.key_id, key.clone());
        Ok(())
    }

    async fn get_key(&self, key_id: &KeyId) -> Result<Option<StoredKey>> {
        Ok(self.read()?.keys.get(key_id).cloned())
    }

    async fn latest_key(
        &self,
        community: &CommunityId,
        chat: Option<&ChatId>,
    ) -> Result<Option<StoredKey>> {
        Ok(self
            .read()?
            .keys
            .values()
            .filter(|k| k.community_id == *community && k.chat_id.as_ref() == chat)
            .max_by_key(|k| (k.created_at, k.key_id))
            .cloned())
    }

    async fn delete_keys(&self, community: &CommunityId, chat: Option<&ChatId>) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.keys.len();
        inner
            .keys
            .retain(|_, k| !(k.community_id == *community && k.chat_id.as_ref() == chat));
        Ok(before - inner.keys.len())
    }

    async fn mark_delivery(&self, marker: &DeliveryMarker) -> Result<()> {
        self.write()?
            .deliveries
            .insert((marker.key_id, marker.recipient), marker.clone());
        Ok(())
    }

    async fn pending_deliveries(&self, community: &CommunityId) -> Result<Vec<DeliveryMarker>> {
        Ok(self
            .read()?
            .deliveries
            .values()
            .filter(|m| m.community_id == *community && m.state == DeliveryState::Pending)
            .cloned()
            .collect())
    }

    async fn set_last_reevaluation(&self, community: &CommunityId, at: i64) -> Result<()> {
        self.write()?.reevaluations.insert(*community, at);
        Ok(())
    }

    async fn last_reevaluation(&self, community: &CommunityId) -> Result<Option<i64>> {
        Ok(self.read()?.reevaluations.get(community).copied())
    }
}
