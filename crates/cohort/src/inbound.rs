//! Inbound message dispatch.
//!
//! Every envelope is opened, checked against its sender and routed to the
//! handler of its message type. Stale updates are dropped with a debug log
//! and never surface as failures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cohort_core::{
    is_newer, validate_description, ClockPolicy, CommunityId, DescriptionChanges, Privilege,
    PublicKey, SignedDescription,
};
use cohort_perms::{compute_key_actions, MembershipView};
use cohort_store::{InsertResult, Store, StoreExt};
use cohort_sync::{ProtocolMessage, SignedEnvelope, Transport};
use tracing::{debug, warn};

use crate::community::{Community, CommunityState};
use crate::error::{ManagerError, Result};
use crate::manager::Manager;

/// What handling one inbound envelope did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A newer description was merged.
    Applied(Arc<DescriptionChanges>),
    /// The message was acted on.
    Handled,
    /// The update was not newer than what is held.
    Stale { current: u64, incoming: u64 },
    /// The message does not concern the local identity.
    Ignored,
}

impl<S: Store + 'static, T: Transport + 'static> Manager<S, T> {
    /// Open and handle one envelope.
    pub async fn handle_envelope(&self, envelope: SignedEnvelope) -> Result<ApplyOutcome> {
        let sender = envelope.sender;
        if sender == self.public_key() {
            return Ok(ApplyOutcome::Ignored);
        }
        let message = envelope.open().map_err(ManagerError::from)?;
        let kind = message.kind();
        let community_id = message.community_id();
        if self.registry.get(&community_id).is_none() {
            debug!(community = %community_id, kind, "message for unknown community");
            return Ok(ApplyOutcome::Ignored);
        }

        match self.dispatch(sender, message).await {
            Err(ManagerError::Stale { current, incoming }) => {
                debug!(community = %community_id, %sender, kind, current, incoming, "stale update dropped");
                Ok(ApplyOutcome::Stale { current, incoming })
            }
            other => other,
        }
    }

    async fn dispatch(&self, sender: PublicKey, message: ProtocolMessage) -> Result<ApplyOutcome> {
        match message {
            ProtocolMessage::Description {
                community_id,
                description,
            } => {
                let state = self.state(&community_id)?;
                self.apply_signed(&state, sender, description).await
            }
            ProtocolMessage::RequestToJoin { request } => {
                self.handle_request_to_join(sender, request).await?;
                Ok(ApplyOutcome::Handled)
            }
            ProtocolMessage::CancelRequestToJoin { community_id, clock } => {
                self.handle_cancel_request(sender, community_id, clock).await?;
                Ok(ApplyOutcome::Handled)
            }
            ProtocolMessage::RequestToLeave { community_id, clock } => {
                self.handle_request_to_leave(sender, community_id, clock).await?;
                Ok(ApplyOutcome::Handled)
            }
            ProtocolMessage::RequestToJoinResponse {
                community_id,
                request_id,
                accepted,
                clock,
                description,
            } => {
                self.handle_request_response(sender, community_id, request_id, accepted, clock, description)
                    .await?;
                Ok(ApplyOutcome::Handled)
            }
            ProtocolMessage::EditSharedAddresses {
                community_id,
                clock,
                revealed_accounts,
            } => {
                self.handle_edit_shared_addresses(sender, community_id, clock, revealed_accounts)
                    .await?;
                Ok(ApplyOutcome::Handled)
            }
            ProtocolMessage::EncryptionKeys { community_id, keys } => {
                self.handle_encryption_keys(sender, community_id, keys).await?;
                Ok(ApplyOutcome::Handled)
            }
            ProtocolMessage::PrivilegedUserSync(sync) => {
                self.handle_privileged_sync(sender, sync).await?;
                Ok(ApplyOutcome::Handled)
            }
            ProtocolMessage::RequestToJoinDecision {
                community_id,
                request_id,
                state,
                ..
            } => {
                self.handle_request_decision(sender, community_id, request_id, state)
                    .await?;
                Ok(ApplyOutcome::Handled)
            }
            ProtocolMessage::ShareAccountsAndRejoin { community_id, .. } => {
                self.handle_share_accounts_and_rejoin(sender, community_id)
                    .await?;
                Ok(ApplyOutcome::Handled)
            }
        }
    }

    /// Merge a description signed by the community key and sent by its control node.
    pub(crate) async fn apply_signed(
        &self,
        state: &CommunityState,
        sender: PublicKey,
        signed: SignedDescription,
    ) -> Result<ApplyOutcome> {
        let id = state.snapshot().id();
        let incoming = signed
            .open(&id)
            .map_err(|e| ManagerError::Unauthorized(format!("description signature: {e}")))?;
        if sender != incoming.control_node {
            return Err(ManagerError::Unauthorized(format!(
                "{sender} sent a description controlled by {}",
                incoming.control_node
            )));
        }
        validate_description(&incoming)?;

        let _guard = state.lock.lock().await;
        let current = state.snapshot();
        if !is_newer(Some(current.clock()), incoming.clock, ClockPolicy::Strict) {
            return Ok(ApplyOutcome::Stale {
                current: current.clock(),
                incoming: incoming.clock,
            });
        }

        let merged = current.description.merge_newer(incoming);
        let changes = Arc::new(DescriptionChanges::between(&current.description, &merged));
        let me = self.public_key();
        let admitted = !current.description.has_member(&me);
        let community = Community {
            joined: merged.has_member(&me) && (current.joined || admitted),
            description: merged,
            signed,
            community_key: current.community_key.clone(),
        };
        if let InsertResult::Conflict { existing } = self.store.commit_community(&community.to_record()).await? {
            warn!(community = %id, clock = community.clock(), ?existing, "conflicting description at recorded clock");
            return Err(ManagerError::InvalidOperation(format!(
                "a different description is stored at clock {}",
                community.clock()
            )));
        }
        if current.joined && !community.joined {
            warn!(community = %id, "removed from community");
        }
        let community = state.publish(community);
        debug!(community = %id, clock = community.clock(), "description applied");
        self.emit_description_events(&community, &changes, None);

        if community.privilege_of(&me) == Privilege::TokenMaster {
            let actions = compute_key_actions(
                &MembershipView::of(&current.description),
                &MembershipView::of(&community.description),
            );
            self.relay_channel_keys(&community, &actions).await?;
        }
        Ok(ApplyOutcome::Applied(changes))
    }

    /// Handle every envelope that arrives within `timeout` of the previous
    /// one. Returns how many were received.
    pub async fn process_inbound(&self, timeout: Duration) -> Result<usize> {
        let mut received = 0;
        while let Some(envelope) = self.transport.recv_timeout(timeout).await.map_err(ManagerError::from)? {
            received += 1;
            let sender = envelope.sender;
            let handled = self
                .handle_envelope(envelope)
                .await
                .with_context(|| format!("handling message from {sender}"));
            if let Err(e) = handled {
                warn!("{e:#}");
            }
        }
        Ok(received)
    }

    /// Handle envelopes until the transport closes.
    pub async fn run_inbound(self: Arc<Self>) -> Result<()> {
        loop {
            let envelope = self.transport.recv().await.map_err(ManagerError::from)?;
            let sender = envelope.sender;
            if let Err(e) = self
                .handle_envelope(envelope)
                .await
                .with_context(|| format!("handling message from {sender}"))
            {
                warn!("{e:#}");
            }
        }
    }

    /// Ids of communities the local identity belongs to.
    pub fn joined_communities(&self) -> Vec<CommunityId> {
        self.communities()
            .into_iter()
            .filter(|c| c.joined)
            .map(|c| c.id())
            .collect()
    }
}
