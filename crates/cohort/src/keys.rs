//! Key distribution.
//!
//! The control node turns the key actions computed at each commit into
//! stored keys and wrapped key messages. A TokenMaster holding a channel
//! key also sends it to members newly seated in that channel. Every recipient is checked against
//! the current description when the key is sent, and a delivery marker is
//! kept per recipient.

use std::collections::BTreeSet;
use std::time::Duration;

use cohort_core::{CommunityId, Description, KeyId, PublicKey};
use cohort_perms::{EncryptionKey, EncryptionKeyAction, EncryptionKeyActions, KeyActionType, KeyScope, WrappedKey};
use cohort_store::{DeliveryMarker, DeliveryState, Store, StoredKey};
use cohort_sync::{CommunityEvent, ProtocolMessage, Transport};
use tracing::{debug, info, warn};

use crate::community::Community;
use crate::error::{ManagerError, Result};
use crate::manager::{now_secs, Manager};

/// Whether `identity` may hold the key of `scope`.
fn may_receive(description: &Description, scope: &KeyScope, identity: &PublicKey) -> bool {
    if description.is_banned(identity) || !description.has_member(identity) {
        return false;
    }
    match scope {
        KeyScope::Community => true,
        KeyScope::Channel(chat_id) => description
            .chats
            .get(chat_id)
            .is_some_and(|chat| chat.members.contains_key(identity)),
    }
}

/// Identities entitled to the key of `scope`.
fn authorized(description: &Description, scope: &KeyScope) -> BTreeSet<PublicKey> {
    match scope {
        KeyScope::Community => description.member_keys(),
        KeyScope::Channel(chat_id) => description
            .chats
            .get(chat_id)
            .map(|chat| chat.members.keys().copied().collect())
            .unwrap_or_default(),
    }
}

impl<S: Store + 'static, T: Transport + 'static> Manager<S, T> {
    /// Carry out the key actions of one commit. The caller holds the community lock.
    pub(crate) async fn execute_key_actions(&self, community: &Community, actions: &EncryptionKeyActions) -> Result<()> {
        self.execute_key_action(community, KeyScope::Community, &actions.community)
            .await?;
        for (chat_id, action) in &actions.channels {
            self.execute_key_action(community, KeyScope::Channel(*chat_id), action)
                .await?;
        }
        Ok(())
    }

    async fn execute_key_action(&self, community: &Community, scope: KeyScope, action: &EncryptionKeyAction) -> Result<()> {
        let id = community.id();
        match action.action_type {
            KeyActionType::None => {}
            KeyActionType::Remove => {
                let removed = self.store.delete_keys(&id, scope.chat_id().as_ref()).await?;
                info!(community = %id, ?scope, removed, "encryption turned off, keys dropped");
            }
            KeyActionType::Add | KeyActionType::Rekey => {
                let key = self.rotate_key(&id, &scope).await?;
                info!(
                    community = %id,
                    ?scope,
                    key_id = %key.key_id,
                    excluded = action.removed.len(),
                    "rekey issued"
                );
                self.send_key(community, &scope, &key, &action.members).await?;
            }
            KeyActionType::SendToMembers => {
                let key = match self.store.latest_key(&id, scope.chat_id().as_ref()).await? {
                    Some(key) => key,
                    None => self.rotate_key(&id, &scope).await?,
                };
                self.send_key(community, &scope, &key, &action.members).await?;
            }
        }
        Ok(())
    }

    /// Send channel keys we hold to members that gained a seat. Rotation
    /// stays with the control node.
    pub(crate) async fn relay_channel_keys(&self, community: &Community, actions: &EncryptionKeyActions) -> Result<usize> {
        let id = community.id();
        let mut relayed = 0;
        for (chat_id, action) in &actions.channels {
            if action.action_type != KeyActionType::SendToMembers {
                continue;
            }
            let Some(key) = self.store.latest_key(&id, Some(chat_id)).await? else {
                continue;
            };
            self.send_key(community, &KeyScope::Channel(*chat_id), &key, &action.members)
                .await?;
            relayed += 1;
        }
        if relayed > 0 {
            debug!(community = %id, channels = relayed, "channel keys relayed");
        }
        Ok(relayed)
    }

    /// Creation time for a new key of `scope`, later than any key already held.
    async fn next_key_time(&self, id: &CommunityId, scope: &KeyScope) -> Result<u64> {
        let now = now_secs();
        Ok(self
            .store
            .latest_key(id, scope.chat_id().as_ref())
            .await?
            .map_or(now, |latest| now.max(latest.created_at + 1)))
    }

    async fn rotate_key(&self, id: &CommunityId, scope: &KeyScope) -> Result<StoredKey> {
        let key = StoredKey {
            community_id: *id,
            chat_id: scope.chat_id(),
            key_id: KeyId::random(),
            key: *EncryptionKey::generate().as_bytes(),
            created_at: self.next_key_time(id, scope).await?,
        };
        self.store.save_key(&key).await?;
        Ok(key)
    }

    /// Wrap and send `key` to each recipient that still may hold it.
    async fn send_key(
        &self,
        community: &Community,
        scope: &KeyScope,
        key: &StoredKey,
        recipients: &BTreeSet<PublicKey>,
    ) -> Result<()> {
        let id = community.id();
        let secret = EncryptionKey::from_bytes(key.key);
        for recipient in recipients {
            if *recipient == self.public_key() {
                continue;
            }
            if !may_receive(&community.description, scope, recipient) {
                warn!(community = %id, member = %recipient, ?scope, "recipient lost access, key withheld");
                continue;
            }
            let mut marker = DeliveryMarker {
                community_id: id,
                key_id: key.key_id,
                recipient: *recipient,
                state: DeliveryState::Pending,
                updated_at: now_secs(),
            };
            self.store.mark_delivery(&marker).await?;

            let wrapped = match WrappedKey::wrap(id, *scope, key.key_id, &secret, *recipient) {
                Ok(wrapped) => wrapped,
                Err(e) => {
                    warn!(community = %id, member = %recipient, error = %e, "key wrapping failed");
                    continue;
                }
            };
            let message = ProtocolMessage::EncryptionKeys {
                community_id: id,
                keys: vec![wrapped],
            };
            if self.deliver(recipient, &message).await? {
                marker.state = DeliveryState::Sent;
                marker.updated_at = now_secs();
                self.store.mark_delivery(&marker).await?;
            }
        }
        Ok(())
    }

    /// Rotate community and channel keys older than `rekey_interval`.
    ///
    /// Returns how many keys were rotated.
    pub async fn rekey_stale_keys(&self, id: &CommunityId) -> Result<usize> {
        let state = self.state(id)?;
        let _guard = state.lock.lock().await;
        let community = state.snapshot();
        self.require_control_node(&community)?;

        let description = &community.description;
        let mut scopes = Vec::new();
        if description.is_encrypted() {
            scopes.push(KeyScope::Community);
        }
        scopes.extend(
            description
                .encrypted_channel_members()
                .into_keys()
                .map(KeyScope::Channel),
        );

        let now = now_secs();
        let mut rotated = 0;
        for scope in scopes {
            let Some(current) = self.store.latest_key(id, scope.chat_id().as_ref()).await? else {
                continue;
            };
            let age = Duration::from_secs(now.saturating_sub(current.created_at));
            if age < self.config.rekey_interval {
                continue;
            }
            let key = self.rotate_key(id, &scope).await?;
            info!(community = %id, ?scope, key_id = %key.key_id, "periodic rekey issued");
            self.send_key(&community, &scope, &key, &authorized(description, &scope))
                .await?;
            rotated += 1;
        }
        Ok(rotated)
    }

    /// Key deliveries not yet handed to the transport.
    pub async fn pending_key_deliveries(&self, id: &CommunityId) -> Result<Vec<DeliveryMarker>> {
        Ok(self.store.pending_deliveries(id).await?)
    }

    /// The current key of the community, or of one of its channels.
    pub async fn current_key(&self, id: &CommunityId, scope: &KeyScope) -> Result<Option<StoredKey>> {
        Ok(self.store.latest_key(id, scope.chat_id().as_ref()).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Store keys wrapped for the local identity.
    pub(crate) async fn handle_encryption_keys(
        &self,
        sender: PublicKey,
        community_id: CommunityId,
        keys: Vec<WrappedKey>,
    ) -> Result<usize> {
        let community = self.community(&community_id)?;
        if !community.privilege_of(&sender).can_manage_requests() {
            return Err(ManagerError::Unauthorized(format!(
                "{sender} may not distribute keys of {community_id}"
            )));
        }

        let mut stored = 0;
        for wrapped in keys {
            if wrapped.recipient != self.public_key() || wrapped.community_id != community_id {
                debug!(community = %community_id, "skipping key wrapped for someone else");
                continue;
            }
            let secret = match wrapped.unwrap_with(&self.identity) {
                Ok(secret) => secret,
                Err(e) => {
                    warn!(community = %community_id, error = %e, "could not unwrap key");
                    continue;
                }
            };
            if self.store.get_key(&wrapped.key_id).await?.is_some() {
                debug!(community = %community_id, key_id = %wrapped.key_id, "key already held");
                continue;
            }
            let created_at = self.next_key_time(&community_id, &wrapped.scope).await?;
            self.store
                .save_key(&StoredKey {
                    community_id,
                    chat_id: wrapped.scope.chat_id(),
                    key_id: wrapped.key_id,
                    key: *secret.as_bytes(),
                    created_at,
                })
                .await?;
            self.events.publish(CommunityEvent::KeyReceived {
                community_id,
                scope: wrapped.scope,
                key_id: wrapped.key_id,
            });
            stored += 1;
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{AccessSettings, Chat, CommunityIdentity, Keypair};

    #[test]
    fn test_may_receive_requires_seat() {
        let control = Keypair::generate().public_key();
        let member = Keypair::generate().public_key();
        let outsider = Keypair::generate().public_key();
        let mut description = Description::new(
            CommunityId::from_key(&Keypair::generate().public_key()),
            control,
            CommunityIdentity::named("keys"),
            AccessSettings::default(),
        );
        description.add_member(member, BTreeSet::new());
        let chat = Chat::new("general");
        let chat_id = chat.id;
        description.create_chat(chat).unwrap();
        description.remove_chat_member(&chat_id, &member);

        assert!(may_receive(&description, &KeyScope::Community, &member));
        assert!(!may_receive(&description, &KeyScope::Channel(chat_id), &member));
        assert!(!may_receive(&description, &KeyScope::Community, &outsider));

        description.ban_member(&member);
        assert!(!may_receive(&description, &KeyScope::Community, &member));
        assert!(authorized(&description, &KeyScope::Community).contains(&control));
    }
}
