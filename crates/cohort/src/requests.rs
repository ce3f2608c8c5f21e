//! Requests to join, from the requester's side and the managers' side.
//!
//! A request is sent to the control node and every member that may manage
//! requests. The control node finalizes every decision. A TokenMaster that
//! accepts or declines moves the request to a `*Pending` state and forwards
//! the decision to the control node.

use std::collections::{BTreeMap, BTreeSet};

use cohort_core::{
    is_newer, AccessPolicy, Address, ChannelRole, ChatId, ClockPolicy, CommunityId, Description,
    MemberRole, Privilege, PublicKey, RequestId, RequestState, RequestToJoin, RevealedAccount,
    SignedDescription,
};
use cohort_perms::{accounts_of, ChannelPermissionsResponse, CheckPermissionsResponse, PermsError};
use cohort_store::{Store, StoreExt};
use cohort_sync::{
    check_sync_entry, validate_privileged_sync, CommunityEvent, PrivilegedSync, PrivilegedSyncKind,
    ProtocolMessage, SyncEntryVerdict, Transport,
};
use tracing::{debug, info, warn};

use crate::community::Community;
use crate::config::AirdropDefault;
use crate::error::{ManagerError, Result};
use crate::manager::{now_secs, Manager};

/// Reject requests the community does not take from `requester`.
fn check_request_access(description: &Description, requester: &PublicKey, ens_name: Option<&str>) -> Result<()> {
    if description.is_banned(requester) {
        return Err(ManagerError::CannotRequestAccess(format!("{requester} is banned")));
    }
    if description.access.policy == AccessPolicy::InvitationOnly {
        return Err(ManagerError::CannotRequestAccess("community is invitation only".into()));
    }
    if description.access.ens_only && ens_name.map_or(true, str::is_empty) {
        return Err(ManagerError::CannotRequestAccess("an ENS name is required".into()));
    }
    Ok(())
}

/// Flag the airdrop account: `airdrop` if given, otherwise per `default`.
fn flag_airdrop(accounts: &mut [RevealedAccount], airdrop: Option<Address>, default: AirdropDefault) -> Result<()> {
    for account in accounts.iter_mut() {
        account.is_airdrop_address = false;
    }
    match airdrop {
        Some(address) => {
            let account = accounts
                .iter_mut()
                .find(|a| a.address == address)
                .ok_or_else(|| ManagerError::InvalidOperation(format!("airdrop address {address} is not revealed")))?;
            account.is_airdrop_address = true;
        }
        None if default == AirdropDefault::FirstRevealed => {
            if let Some(first) = accounts.first_mut() {
                first.is_airdrop_address = true;
            }
        }
        None => {}
    }
    Ok(())
}

fn roles_for(privilege: Privilege) -> BTreeSet<MemberRole> {
    match privilege {
        Privilege::TokenMaster => [MemberRole::TokenMaster].into(),
        Privilege::Admin => [MemberRole::Admin].into(),
        _ => BTreeSet::new(),
    }
}

impl<S: Store + 'static, T: Transport + 'static> Manager<S, T> {
    // ─────────────────────────────────────────────────────────────────────────
    // Requester
    // ─────────────────────────────────────────────────────────────────────────

    /// Ask to join a community, revealing `accounts` as proof of holdings.
    ///
    /// Fails with [`ManagerError::PermissionNotSatisfied`] without sending or
    /// storing anything when the accounts do not pass the membership gate.
    pub async fn request_to_join(
        &self,
        community_id: &CommunityId,
        mut accounts: Vec<RevealedAccount>,
        airdrop: Option<Address>,
        ens_name: Option<String>,
    ) -> Result<RequestToJoin> {
        let community = self.community(community_id)?;
        let me = self.public_key();
        if community.description.has_member(&me) {
            return Err(ManagerError::InvalidOperation(format!("already a member of {community_id}")));
        }
        check_request_access(&community.description, &me, ens_name.as_deref())?;

        let id = RequestId::derive(&me, community_id);
        if let Some(previous) = self.store.get_request(&id).await? {
            if previous.should_retain_declined(now_secs(), self.config.decline_cooloff.as_secs()) {
                return Err(ManagerError::RequestAlreadyRejected);
            }
        }

        flag_airdrop(&mut accounts, airdrop, self.config.airdrop_default)?;
        let mut request = RequestToJoin::new(me, *community_id, 0, accounts);
        request.ens_name = ens_name;
        request
            .verify_accounts()
            .map_err(|e| ManagerError::Unauthorized(format!("revealed account: {e}")))?;

        if !self
            .satisfies_join_gate(&community.description, &request.revealed_accounts)
            .await?
        {
            info!(community = %community_id, "membership gate not satisfied, request not sent");
            return Err(ManagerError::PermissionNotSatisfied);
        }
        self.submit_request(&community, request).await
    }

    /// Stamp, store and send our request.
    pub(crate) async fn submit_request(&self, community: &Community, mut request: RequestToJoin) -> Result<RequestToJoin> {
        let now = now_secs();
        request.clock = match self.store.get_request(&request.id).await? {
            Some(previous) => now.max(previous.clock + 1),
            None => now,
        };
        request.state = RequestState::Pending;
        request.our = true;
        self.store.save_request(&request).await?;

        let message = ProtocolMessage::RequestToJoin {
            request: request.clone(),
        };
        self.deliver_to_managers(community, &message).await?;
        self.emit_request_state(&request);
        info!(
            community = %request.community_id,
            request = %request.id,
            accounts = request.revealed_accounts.len(),
            "request to join sent"
        );
        Ok(request)
    }

    /// Withdraw our request to join.
    pub async fn cancel_request_to_join(&self, community_id: &CommunityId) -> Result<RequestToJoin> {
        let community = self.community(community_id)?;
        let id = RequestId::derive(&self.public_key(), community_id);
        let mut request = self
            .store
            .get_request(&id)
            .await?
            .ok_or(ManagerError::RequestNotFound(id))?;
        if request.state.is_terminal() {
            return Err(ManagerError::InvalidOperation(format!(
                "request is already {}",
                request.state.as_str()
            )));
        }

        request.clock = now_secs().max(request.clock + 1);
        request.state = RequestState::Canceled;
        self.store.save_request(&request).await?;
        let message = ProtocolMessage::CancelRequestToJoin {
            community_id: *community_id,
            clock: request.clock,
        };
        self.deliver_to_managers(&community, &message).await?;
        self.emit_request_state(&request);
        Ok(request)
    }

    /// Replace the accounts we revealed to a community we belong to.
    pub async fn edit_shared_addresses(
        &self,
        community_id: &CommunityId,
        mut accounts: Vec<RevealedAccount>,
        airdrop: Option<Address>,
    ) -> Result<RequestToJoin> {
        let community = self.community(community_id)?;
        let me = self.public_key();
        if !community.description.has_member(&me) {
            return Err(ManagerError::MemberNotFound);
        }
        flag_airdrop(&mut accounts, airdrop, self.config.airdrop_default)?;
        for account in &accounts {
            account
                .verify(&me, community_id)
                .map_err(|e| ManagerError::Unauthorized(format!("revealed account: {e}")))?;
        }

        let id = RequestId::derive(&me, community_id);
        let now = now_secs();
        let mut request = match self.store.get_request(&id).await? {
            Some(mut previous) => {
                previous.clock = now.max(previous.clock + 1);
                previous
            }
            None => {
                let mut request = RequestToJoin::new(me, *community_id, now, Vec::new());
                request.state = RequestState::Accepted;
                request
            }
        };
        request.revealed_accounts = accounts;
        request.our = true;
        self.store.save_request(&request).await?;

        let message = ProtocolMessage::EditSharedAddresses {
            community_id: *community_id,
            clock: request.clock,
            revealed_accounts: request.revealed_accounts.clone(),
        };
        self.deliver_to_managers(&community, &message).await?;
        info!(community = %community_id, accounts = request.revealed_accounts.len(), "shared addresses edited");
        Ok(request)
    }

    /// Ask the control node to remove us. The clock is newer than our request to join.
    pub(crate) async fn send_request_to_leave(&self, community: &Community) -> Result<()> {
        let community_id = community.id();
        let id = RequestId::derive(&self.public_key(), &community_id);
        let now = now_secs();
        let clock = match self.store.get_request(&id).await? {
            Some(mut request) => {
                request.clock = now.max(request.clock + 1);
                self.store.save_request(&request).await?;
                request.clock
            }
            None => now,
        };
        let message = ProtocolMessage::RequestToLeave { community_id, clock };
        self.deliver(&community.control_node(), &message).await?;
        info!(community = %community_id, clock, "request to leave sent");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────────

    /// Accept a request. A TokenMaster's acceptance is forwarded to the control node.
    pub async fn accept_request_to_join(&self, request_id: &RequestId) -> Result<RequestToJoin> {
        let request = self.get_request(request_id).await?;
        let community = self.community(&request.community_id)?;
        match community.privilege_of(&self.public_key()) {
            Privilege::ControlNode => self.finalize_accept(request).await,
            privilege if privilege.can_manage_requests() => {
                self.forward_decision(&community, request, RequestState::AcceptedPending)
                    .await
            }
            _ => Err(ManagerError::Unauthorized("only the control node or a token master may accept".into())),
        }
    }

    /// Decline a request. A TokenMaster's decline is forwarded to the control node.
    pub async fn decline_request_to_join(&self, request_id: &RequestId) -> Result<RequestToJoin> {
        let request = self.get_request(request_id).await?;
        let community = self.community(&request.community_id)?;
        match community.privilege_of(&self.public_key()) {
            Privilege::ControlNode => self.finalize_decline(request).await,
            privilege if privilege.can_manage_requests() => {
                self.forward_decision(&community, request, RequestState::DeclinedPending)
                    .await
            }
            _ => Err(ManagerError::Unauthorized("only the control node or a token master may decline".into())),
        }
    }

    async fn forward_decision(
        &self,
        community: &Community,
        mut request: RequestToJoin,
        state: RequestState,
    ) -> Result<RequestToJoin> {
        if request.state.is_terminal() {
            return Err(ManagerError::InvalidOperation(format!(
                "request is already {}",
                request.state.as_str()
            )));
        }
        request.state = state;
        self.store.save_request(&request).await?;
        self.emit_request_state(&request);

        let message = ProtocolMessage::RequestToJoinDecision {
            community_id: request.community_id,
            request_id: request.id,
            state,
            clock: now_secs(),
        };
        self.deliver(&community.control_node(), &message).await?;
        info!(community = %request.community_id, request = %request.id, state = state.as_str(), "decision forwarded");
        Ok(request)
    }

    /// Add the requester as a member. Control node only.
    pub(crate) async fn finalize_accept(&self, mut request: RequestToJoin) -> Result<RequestToJoin> {
        if request.state == RequestState::Canceled {
            return Err(ManagerError::InvalidOperation("request was canceled".into()));
        }
        if request.state == RequestState::Declined {
            request.clock = now_secs().max(request.clock + 1);
        }
        let id = request.community_id;
        let requester = request.public_key;
        let snapshot = self.community(&id)?;
        self.require_control_node(&snapshot)?;

        let accounts = accounts_of(&request.revealed_accounts);
        let balances = self.fetch_balances(&snapshot.description, request.addresses()).await?;
        let privilege = self
            .evaluator
            .evaluate_member_role(&snapshot.description, &accounts, &balances);
        if privilege == Privilege::None {
            return Err(ManagerError::PermissionNotSatisfied);
        }
        let seats: Vec<(ChatId, ChannelRole)> = snapshot
            .description
            .encrypted_channel_members()
            .into_keys()
            .filter_map(|chat_id| {
                self.evaluator
                    .channel_role(&snapshot.description, &chat_id, &accounts, &balances)
                    .map(|role| (chat_id, role))
            })
            .collect();

        let state = self.state(&id)?;
        let guard = state.lock.lock().await;
        let current = state.snapshot();
        let key = self.require_control_node(&current)?;
        let mut next = current.description.clone();
        next.add_member(requester, roles_for(privilege));
        for (chat_id, role) in &seats {
            next.set_chat_member(chat_id, requester, *role);
        }
        next.touch_member_addresses(&requester, request.clock)?;
        if next.access.policy == AccessPolicy::AutoAccept && next.members.len() >= self.config.max_members {
            next.access.policy = AccessPolicy::OnRequest;
            info!(community = %id, members = next.members.len(), "member limit reached, switching to on-request");
        }
        self.commit(&state, &current, next, key).await?;
        let community = state.snapshot();
        drop(guard);

        request.state = RequestState::Accepted;
        self.store.save_request(&request).await?;
        self.emit_request_state(&request);
        info!(community = %id, member = %requester, ?privilege, "request to join accepted");

        self.respond(&request, true, Some(community.signed.clone())).await?;
        self.share_with_privileged(&community, PrivilegedSyncKind::AcceptRequest, vec![request.clone()])
            .await?;
        Ok(request)
    }

    /// Decline a request. Control node only.
    pub(crate) async fn finalize_decline(&self, mut request: RequestToJoin) -> Result<RequestToJoin> {
        if request.state == RequestState::Accepted {
            return Err(ManagerError::InvalidOperation("request was already accepted".into()));
        }
        let state = self.state(&request.community_id)?;
        let guard = state.lock.lock().await;
        let community = state.snapshot();
        self.require_control_node(&community)?;
        request.state = RequestState::Declined;
        self.store.save_request(&request).await?;
        drop(guard);

        self.emit_request_state(&request);
        info!(community = %request.community_id, request = %request.id, "request to join declined");
        self.respond(&request, false, None).await?;
        self.share_with_privileged(&community, PrivilegedSyncKind::RejectRequest, vec![request.clone()])
            .await?;
        Ok(request)
    }

    async fn respond(&self, request: &RequestToJoin, accepted: bool, description: Option<SignedDescription>) -> Result<()> {
        let message = ProtocolMessage::RequestToJoinResponse {
            community_id: request.community_id,
            request_id: request.id,
            accepted,
            clock: request.clock,
            description,
        };
        self.deliver(&request.public_key, &message).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Privileged sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Replicate requests to privileged members. Owners and TokenMasters
    /// receive revealed accounts, Admins do not.
    pub(crate) async fn share_with_privileged(
        &self,
        community: &Community,
        kind: PrivilegedSyncKind,
        requests: Vec<RequestToJoin>,
    ) -> Result<()> {
        if requests.is_empty() || community.control_node() != self.public_key() {
            return Ok(());
        }
        let clock = now_secs();
        let full: Vec<RequestToJoin> = requests
            .into_iter()
            .map(|mut request| {
                request.our = false;
                request
            })
            .collect();
        let stripped: Vec<RequestToJoin> = full.iter().map(RequestToJoin::without_accounts).collect();

        for member in community.description.privileged_members() {
            let with_accounts = member.has_role(MemberRole::Owner) || member.has_role(MemberRole::TokenMaster);
            let message = ProtocolMessage::PrivilegedUserSync(PrivilegedSync {
                community_id: community.id(),
                clock,
                kind,
                requests: if with_accounts { full.clone() } else { stripped.clone() },
            });
            self.deliver(&member.public_key, &message).await?;
        }
        debug!(community = %community.id(), ?kind, requests = full.len(), "requests shared with privileged members");
        Ok(())
    }

    /// Send every stored request to the privileged members. Control node only.
    pub async fn share_requests_with_privileged_members(&self, id: &CommunityId) -> Result<usize> {
        let community = self.community(id)?;
        self.require_control_node(&community)?;
        let requests = self.store.list_requests(id, None).await?;
        let count = requests.len();
        self.share_with_privileged(&community, PrivilegedSyncKind::AllRequests, requests)
            .await?;
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) async fn handle_request_to_join(&self, sender: PublicKey, mut request: RequestToJoin) -> Result<()> {
        if sender != request.public_key {
            return Err(ManagerError::Unauthorized(format!("{sender} sent a request on behalf of {}", request.public_key)));
        }
        if request.id != RequestId::derive(&request.public_key, &request.community_id) {
            return Err(ManagerError::Unauthorized("request id does not match requester".into()));
        }
        let community = self.community(&request.community_id)?;
        if !community.privilege_of(&self.public_key()).can_manage_requests() {
            debug!(community = %community.id(), "ignoring request to join, not a manager");
            return Ok(());
        }
        request
            .verify_accounts()
            .map_err(|e| ManagerError::Unauthorized(format!("revealed account: {e}")))?;

        let description = &community.description;
        if description.has_member(&sender) {
            return Err(ManagerError::InvalidOperation(format!("{sender} is already a member")));
        }
        let existing = self.store.get_request(&request.id).await?;
        let awaiting = existing
            .as_ref()
            .is_some_and(|e| e.state == RequestState::AwaitingAddresses);
        if !awaiting {
            if let Some(existing) = &existing {
                if existing.should_retain_declined(request.clock, self.config.decline_cooloff.as_secs()) {
                    return Err(ManagerError::RequestAlreadyRejected);
                }
                if !is_newer(Some(existing.clock), request.clock, ClockPolicy::Strict) {
                    return Err(ManagerError::Stale {
                        current: existing.clock,
                        incoming: request.clock,
                    });
                }
            }
            check_request_access(description, &sender, request.ens_name.as_deref())?;
            let pending = self
                .store
                .list_requests(&community.id(), Some(RequestState::Pending))
                .await?;
            if pending.len() >= self.config.max_pending_requests {
                return Err(ManagerError::TooManyPendingRequests);
            }
        }

        request.our = false;
        request.state = RequestState::Pending;
        self.store.save_request(&request).await?;
        self.emit_request_state(&request);
        info!(community = %community.id(), requester = %sender, awaiting, "request to join received");

        if community.control_node() != self.public_key() {
            return Ok(());
        }
        if !self.satisfies_join_gate(description, &request.revealed_accounts).await? {
            self.finalize_decline(request).await?;
        } else if awaiting || description.access.policy == AccessPolicy::AutoAccept {
            self.finalize_accept(request).await?;
        } else {
            self.share_with_privileged(&community, PrivilegedSyncKind::AllRequests, vec![request])
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn handle_request_decision(
        &self,
        sender: PublicKey,
        community_id: CommunityId,
        request_id: RequestId,
        state: RequestState,
    ) -> Result<()> {
        let community = self.community(&community_id)?;
        if community.control_node() != self.public_key() {
            debug!(community = %community_id, "ignoring forwarded decision, not the control node");
            return Ok(());
        }
        if !community.privilege_of(&sender).can_manage_requests() {
            return Err(ManagerError::Unauthorized(format!("{sender} may not decide requests")));
        }
        let request = self.get_request(&request_id).await?;
        if request.state.is_terminal() {
            debug!(community = %community_id, request = %request_id, state = request.state.as_str(), "request already decided");
            return Ok(());
        }
        match state {
            RequestState::AcceptedPending => self.finalize_accept(request).await?,
            RequestState::DeclinedPending => self.finalize_decline(request).await?,
            other => {
                return Err(ManagerError::InvalidOperation(format!(
                    "forwarded decision in state {}",
                    other.as_str()
                )))
            }
        };
        Ok(())
    }

    pub(crate) async fn handle_cancel_request(&self, sender: PublicKey, community_id: CommunityId, clock: u64) -> Result<()> {
        let community = self.community(&community_id)?;
        if !community.privilege_of(&self.public_key()).can_manage_requests() {
            return Ok(());
        }
        let id = RequestId::derive(&sender, &community_id);
        let mut request = self.get_request(&id).await?;
        if !is_newer(Some(request.clock), clock, ClockPolicy::Strict) {
            return Err(ManagerError::InvalidClock);
        }
        request.clock = clock;
        request.state = RequestState::Canceled;
        self.store.save_request(&request).await?;
        self.emit_request_state(&request);
        info!(community = %community_id, requester = %sender, "request to join canceled");

        if community.control_node() == self.public_key() && community.description.has_member(&sender) {
            self.edit_description(&community_id, move |d| Ok(d.remove_member(&sender)))
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn handle_request_to_leave(&self, sender: PublicKey, community_id: CommunityId, clock: u64) -> Result<()> {
        let community = self.community(&community_id)?;
        if community.control_node() != self.public_key() {
            debug!(community = %community_id, "ignoring request to leave, not the control node");
            return Ok(());
        }
        if !community.description.has_member(&sender) {
            debug!(community = %community_id, member = %sender, "request to leave from a non-member");
            return Ok(());
        }
        let id = RequestId::derive(&sender, &community_id);
        if let Some(mut request) = self.store.get_request(&id).await? {
            if request.clock > clock {
                return Err(ManagerError::InvalidClock);
            }
            request.clock = clock;
            self.store.save_request(&request).await?;
        }
        self.edit_description(&community_id, move |d| Ok(d.remove_member(&sender)))
            .await?;
        info!(community = %community_id, member = %sender, "member left");
        Ok(())
    }

    pub(crate) async fn handle_edit_shared_addresses(
        &self,
        sender: PublicKey,
        community_id: CommunityId,
        clock: u64,
        accounts: Vec<RevealedAccount>,
    ) -> Result<()> {
        let community = self.community(&community_id)?;
        if !community.privilege_of(&self.public_key()).can_manage_requests() {
            return Ok(());
        }
        let Some(member) = community.description.member(&sender) else {
            return Err(ManagerError::MemberNotFound);
        };
        for account in &accounts {
            account
                .verify(&sender, &community_id)
                .map_err(|e| ManagerError::Unauthorized(format!("revealed account: {e}")))?;
        }
        if clock == 0 {
            return Err(ManagerError::InvalidClock);
        }

        let id = RequestId::derive(&sender, &community_id);
        let existing = self.store.get_request(&id).await?;
        let current = existing
            .as_ref()
            .map_or(member.last_update_clock, |e| e.clock.max(member.last_update_clock));
        if !is_newer(Some(current), clock, ClockPolicy::Strict) {
            return Err(ManagerError::Stale { current, incoming: clock });
        }

        let mut request = existing.unwrap_or_else(|| {
            let mut request = RequestToJoin::new(sender, community_id, clock, Vec::new());
            request.state = RequestState::Accepted;
            request
        });
        request.clock = clock;
        request.revealed_accounts = accounts;
        request.our = false;
        self.store.save_request(&request).await?;
        debug!(community = %community_id, member = %sender, accounts = request.revealed_accounts.len(), "shared addresses updated");

        if community.control_node() != self.public_key() {
            return Ok(());
        }
        // Members failing the gate are removed by the reevaluation below.
        self.edit_description(&community_id, move |d| Ok(d.touch_member_addresses(&sender, clock)?))
            .await?;
        self.force_members_reevaluation(&community_id).await?;
        let community = self.community(&community_id)?;
        self.share_with_privileged(&community, PrivilegedSyncKind::EditSharedAddresses, vec![request])
            .await
    }

    /// Apply a sync from the control node entry by entry. Returns how many
    /// entries were stored.
    pub(crate) async fn handle_privileged_sync(&self, sender: PublicKey, sync: PrivilegedSync) -> Result<usize> {
        validate_privileged_sync(&sync).map_err(|e| ManagerError::MalformedSync(e.to_string()))?;
        let community = self.community(&sync.community_id)?;
        if sender != community.control_node() {
            return Err(ManagerError::Unauthorized(format!("{sender} is not the control node")));
        }
        if !community.privilege_of(&self.public_key()).is_privileged() {
            debug!(community = %sync.community_id, "ignoring privileged sync, not privileged");
            return Ok(0);
        }

        let me = self.public_key();
        let mut applied = 0;
        for mut incoming in sync.requests {
            let local = self.store.get_request(&incoming.id).await?;
            match check_sync_entry(local.as_ref(), &incoming) {
                SyncEntryVerdict::Apply => {
                    incoming.our = local.as_ref().map_or(incoming.public_key == me, |l| l.our);
                    self.store.save_request(&incoming).await?;
                    self.emit_request_state(&incoming);
                    applied += 1;
                }
                SyncEntryVerdict::Stale => {
                    debug!(community = %sync.community_id, request = %incoming.id, "stale sync entry kept local record");
                }
                SyncEntryVerdict::Malformed(reason) => {
                    warn!(community = %sync.community_id, request = %incoming.id, %reason, "malformed sync entry ignored");
                }
            }
        }
        debug!(community = %sync.community_id, kind = ?sync.kind, applied, "privileged sync applied");
        Ok(applied)
    }

    pub(crate) async fn handle_request_response(
        &self,
        sender: PublicKey,
        community_id: CommunityId,
        request_id: RequestId,
        accepted: bool,
        clock: u64,
        description: Option<SignedDescription>,
    ) -> Result<()> {
        if request_id != RequestId::derive(&self.public_key(), &community_id) {
            debug!(community = %community_id, "ignoring response addressed to someone else");
            return Ok(());
        }
        let state = self.state(&community_id)?;
        if sender != state.snapshot().control_node() {
            return Err(ManagerError::Unauthorized(format!("{sender} is not the control node")));
        }
        let Some(mut request) = self.store.get_request(&request_id).await?.filter(|r| r.our) else {
            return Ok(());
        };
        if let Some(signed) = description {
            self.apply_signed(&state, sender, signed).await?;
        }
        request.state = if accepted {
            RequestState::Accepted
        } else {
            RequestState::Declined
        };
        request.clock = request.clock.max(clock);
        self.store.save_request(&request).await?;
        self.emit_request_state(&request);
        info!(community = %community_id, accepted, clock = request.clock, "request to join answered");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_request(&self, id: &RequestId) -> Result<RequestToJoin> {
        self.store
            .get_request(id)
            .await?
            .ok_or(ManagerError::RequestNotFound(*id))
    }

    /// Requests of a community, optionally only those in `state`.
    pub async fn requests(&self, id: &CommunityId, state: Option<RequestState>) -> Result<Vec<RequestToJoin>> {
        Ok(self.store.list_requests(id, state).await?)
    }

    /// Detailed check of `accounts` against the joining permissions.
    pub async fn check_permission_to_join(
        &self,
        id: &CommunityId,
        accounts: &[RevealedAccount],
    ) -> Result<CheckPermissionsResponse> {
        let community = self.community(id)?;
        let balances = self
            .fetch_balances(&community.description, accounts.iter().map(|a| a.address))
            .await?;
        Ok(self
            .evaluator
            .check_permission_to_join(&community.description, &accounts_of(accounts), &balances)?)
    }

    /// View and post permissions of one chat for the accounts we revealed.
    pub async fn check_channel_permissions(&self, id: &CommunityId, chat_id: &ChatId) -> Result<ChannelPermissionsResponse> {
        let community = self.community(id)?;
        if !community.description.chats.contains_key(chat_id) {
            return Err(ManagerError::ChatNotFound(*chat_id));
        }
        let revealed = self.store.revealed_accounts(id, &self.public_key()).await?;
        let balances = self
            .fetch_balances(&community.description, revealed.iter().map(|a| a.address))
            .await?;
        Ok(self.evaluator.check_channel_permissions(
            &community.description,
            chat_id,
            &accounts_of(&revealed),
            &balances,
        )?)
    }

    /// [`check_channel_permissions`](Self::check_channel_permissions) for every chat.
    pub async fn check_all_channels_permissions(
        &self,
        id: &CommunityId,
    ) -> Result<BTreeMap<ChatId, ChannelPermissionsResponse>> {
        let community = self.community(id)?;
        let revealed = self.store.revealed_accounts(id, &self.public_key()).await?;
        let accounts = accounts_of(&revealed);
        let balances = self
            .fetch_balances(&community.description, revealed.iter().map(|a| a.address))
            .await?;
        let mut responses = BTreeMap::new();
        for chat_id in community.description.chats.keys() {
            let response = self
                .evaluator
                .check_channel_permissions(&community.description, chat_id, &accounts, &balances)?;
            responses.insert(*chat_id, response);
        }
        Ok(responses)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether `accounts` pass the joining permissions. Accounts on no
    /// supported network do not.
    pub(crate) async fn satisfies_join_gate(&self, description: &Description, accounts: &[RevealedAccount]) -> Result<bool> {
        let balances = self
            .fetch_balances(description, accounts.iter().map(|a| a.address))
            .await?;
        match self
            .evaluator
            .check_permission_to_join(description, &accounts_of(accounts), &balances)
        {
            Ok(response) => Ok(response.satisfied),
            Err(PermsError::NetworksNotSupported) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn emit_request_state(&self, request: &RequestToJoin) {
        self.events.publish(CommunityEvent::RequestStateChanged {
            community_id: request.community_id,
            request_id: request.id,
            requester: request.public_key,
            state: request.state,
        });
    }
}
