//! Community snapshots and the per-community lock.
//!
//! Mutations of one community are serialized by an async mutex. Readers
//! take the published `Arc<Community>` and never wait on a writer.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use cohort_core::{CommunityId, Description, Keypair, Privilege, PublicKey, SignedDescription};
use cohort_store::CommunityRecord;
use tokio::sync::Mutex;

use crate::error::Result;

/// A community as held by the local identity.
#[derive(Debug, Clone)]
pub struct Community {
    pub description: Description,
    /// The signed form `description` was last published or received as.
    pub signed: SignedDescription,
    /// Whether the local identity considers itself a member.
    pub joined: bool,
    /// The community key, held by the control node.
    pub(crate) community_key: Option<Keypair>,
}

impl Community {
    pub fn id(&self) -> CommunityId {
        self.description.community_id
    }

    pub fn clock(&self) -> u64 {
        self.description.clock
    }

    pub fn privilege_of(&self, identity: &PublicKey) -> Privilege {
        self.description.privilege_of(identity)
    }

    pub fn control_node(&self) -> PublicKey {
        self.description.control_node
    }

    /// Whether the community key is held locally.
    pub fn has_community_key(&self) -> bool {
        self.community_key.is_some()
    }

    pub(crate) fn to_record(&self) -> CommunityRecord {
        CommunityRecord {
            id: self.id(),
            description: self.signed.clone(),
            clock: self.clock(),
            private_key: self.community_key.as_ref().map(Keypair::seed),
            joined: self.joined,
        }
    }

    /// Rebuild from storage. The record was verified when it was stored.
    pub(crate) fn from_record(record: CommunityRecord) -> Result<Self> {
        let description = record.description.decode_unverified()?;
        Ok(Self {
            description,
            signed: record.description,
            joined: record.joined,
            community_key: record.private_key.map(|seed| Keypair::from_seed(&seed)),
        })
    }
}

/// Lock and published snapshot of one community.
pub(crate) struct CommunityState {
    pub(crate) lock: Mutex<()>,
    snapshot: RwLock<Arc<Community>>,
}

impl CommunityState {
    fn new(community: Community) -> Self {
        Self {
            lock: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(community)),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<Community> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the snapshot. Callers hold `lock`.
    pub(crate) fn publish(&self, community: Community) -> Arc<Community> {
        let community = Arc::new(community);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&community);
        community
    }
}

/// Every community known to the manager.
#[derive(Default)]
pub(crate) struct Registry {
    communities: RwLock<HashMap<CommunityId, Arc<CommunityState>>>,
}

impl Registry {
    pub(crate) fn get(&self, id: &CommunityId) -> Option<Arc<CommunityState>> {
        self.communities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Register a community. An existing entry is returned unchanged.
    pub(crate) fn insert(&self, community: Community) -> Arc<CommunityState> {
        let mut communities = self.communities.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            communities
                .entry(community.id())
                .or_insert_with(|| Arc::new(CommunityState::new(community))),
        )
    }

    pub(crate) fn snapshots(&self) -> Vec<Arc<Community>> {
        self.communities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|state| state.snapshot())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{AccessSettings, CommunityIdentity};

    fn community() -> Community {
        let key = Keypair::generate();
        let description = Description::new(
            CommunityId::from_key(&key.public_key()),
            Keypair::generate().public_key(),
            CommunityIdentity::named("snapshots"),
            AccessSettings::default(),
        );
        let signed = SignedDescription::sign(&description, &key).unwrap();
        Community {
            description,
            signed,
            joined: true,
            community_key: Some(key),
        }
    }

    #[test]
    fn test_record_roundtrip_keeps_key() {
        let original = community();
        let restored = Community::from_record(original.to_record()).unwrap();
        assert_eq!(restored.description, original.description);
        assert_eq!(
            restored.community_key.map(|k| k.public_key()),
            original.community_key.map(|k| k.public_key())
        );
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let registry = Registry::default();
        let original = community();
        let id = original.id();
        let state = registry.insert(original.clone());
        let before = state.snapshot();

        let mut next = original;
        next.joined = false;
        state.publish(next);

        assert!(before.joined);
        assert!(!registry.get(&id).unwrap().snapshot().joined);
        assert_eq!(registry.snapshots().len(), 1);
    }
}
