//! Control node handover.
//!
//! A new control node removes every other member and asks them to reveal
//! their accounts again. Their resubmitted requests find an
//! `AwaitingAddresses` record and are accepted without a manual decision.

use std::sync::Arc;

use cohort_core::{CommunityId, Keypair, MemberRole, PublicKey, RequestId, RequestState, RequestToJoin};
use cohort_store::{Store, StoreExt};
use cohort_sync::{CommunityEvent, ProtocolMessage, Transport};
use tracing::{debug, info};

use crate::community::Community;
use crate::error::{ManagerError, Result};
use crate::manager::{now_secs, Manager};

impl<S: Store + 'static, T: Transport + 'static> Manager<S, T> {
    /// Take over as control node with the community key.
    ///
    /// When the local identity already is the control node, only members
    /// that never revealed an account are removed.
    pub async fn promote_self_to_control_node(
        &self,
        community_id: &CommunityId,
        community_key: Keypair,
    ) -> Result<Arc<Community>> {
        if CommunityId::from_key(&community_key.public_key()) != *community_id {
            return Err(ManagerError::Unauthorized(format!(
                "key does not belong to community {community_id}"
            )));
        }
        let me = self.public_key();
        let state = self.state(community_id)?;
        let guard = state.lock.lock().await;
        let current = state.snapshot();

        if current.control_node() == me {
            if !current.has_community_key() {
                let mut community = (*current).clone();
                community.community_key = Some(community_key);
                self.store.save_community(&community.to_record()).await?;
                state.publish(community);
            }
            drop(guard);
            let removed = self.remove_users_without_revealed_accounts(community_id).await?;
            info!(community = %community_id, removed, "control node restored");
            return Ok(self.community(community_id)?);
        }

        let previous_control = current.control_node();
        let kicked: Vec<PublicKey> = current
            .description
            .members
            .keys()
            .filter(|member| **member != me)
            .copied()
            .collect();

        let mut next = current.description.clone();
        next.control_node = me;
        for member in &kicked {
            next.remove_member(member);
        }
        if !next.add_member(me, [MemberRole::Owner].into()) {
            next.set_roles(&me, [MemberRole::Owner].into())?;
        }

        let now = now_secs();
        for member in &kicked {
            let accounts = self.store.revealed_accounts(community_id, member).await?;
            let mut request = RequestToJoin::new(*member, *community_id, now, accounts);
            request.state = RequestState::AwaitingAddresses;
            self.store.save_request(&request).await?;
        }

        self.commit(&state, &current, next, community_key).await?;
        let community = state.snapshot();
        drop(guard);

        info!(
            community = %community_id,
            previous = %previous_control,
            kicked = kicked.len(),
            "promoted to control node"
        );
        let message = ProtocolMessage::ShareAccountsAndRejoin {
            community_id: *community_id,
            clock: now,
        };
        for member in &kicked {
            self.deliver(member, &message).await?;
        }
        Ok(community)
    }

    /// The community key, for handing control to another device.
    pub fn export_community_key(&self, id: &CommunityId) -> Result<Keypair> {
        self.community(id)?
            .community_key
            .clone()
            .ok_or_else(|| ManagerError::Unauthorized(format!("no key held for community {id}")))
    }

    /// Remove members with no revealed account. Control node only.
    pub async fn remove_users_without_revealed_accounts(&self, id: &CommunityId) -> Result<usize> {
        let community = self.community(id)?;
        self.require_control_node(&community)?;
        let me = self.public_key();

        let mut without = Vec::new();
        for (member, entry) in &community.description.members {
            if *member == me || entry.has_role(MemberRole::Owner) {
                continue;
            }
            if self.store.revealed_accounts(id, member).await?.is_empty() {
                without.push(*member);
            }
        }
        if without.is_empty() {
            return Ok(0);
        }
        let count = without.len();
        self.edit_description(id, move |d| {
            for member in &without {
                d.remove_member(member);
            }
            Ok(())
        })
        .await?;
        info!(community = %id, removed = count, "removed members without revealed accounts");
        Ok(count)
    }

    /// Resubmit our request when the control node asks for it.
    pub(crate) async fn handle_share_accounts_and_rejoin(&self, sender: PublicKey, community_id: CommunityId) -> Result<()> {
        let community = self.community(&community_id)?;
        if sender != community.control_node() {
            return Err(ManagerError::Unauthorized(format!("{sender} is not the control node")));
        }
        self.events.publish(CommunityEvent::RejoinRequested { community_id });

        let me = self.public_key();
        if community.description.has_member(&me) {
            return Ok(());
        }
        let request = self
            .store
            .get_request(&RequestId::derive(&me, &community_id))
            .await?
            .filter(|r| r.our && !r.revealed_accounts.is_empty());
        match request {
            Some(request) => {
                info!(community = %community_id, "resubmitting request to join for new control node");
                self.submit_request(&community, request).await?;
            }
            None => debug!(community = %community_id, "rejoin requested, no revealed accounts to resubmit"),
        }
        Ok(())
    }
}
