//! Request to join lifecycle: decisions, cancellation and privileged replication.

mod common;

use cohort::core::{AccessPolicy, PermissionType, RequestId};
use cohort::sync::{PrivilegedSync, PrivilegedSyncKind, ProtocolMessage, SignedEnvelope};
use cohort::{ApplyOutcome, ManagerError, Privilege, RequestState, RequestToJoin, RoleViolation};
use cohort_testkit::{member_permission, pump, tokens, TestNetwork};

use common::{community, init_tracing, join};

#[tokio::test]
async fn test_declined_request_cannot_be_repeated_within_cooloff() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let alice = network.node().await;
    let all = [&owner, &alice];

    let community = community(&owner, AccessPolicy::OnRequest, &[&alice]).await;
    let id = community.id();
    join(&alice, &id, &all).await;

    let request_id = RequestId::derive(&alice.public_key(), &id);
    let pending = owner.manager.requests(&id, Some(RequestState::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, request_id);

    owner.manager.decline_request_to_join(&request_id).await.unwrap();
    pump(&all).await;
    assert_eq!(
        alice.manager.get_request(&request_id).await.unwrap().state,
        RequestState::Declined
    );
    assert!(!alice.manager.community(&id).unwrap().joined);

    let err = alice
        .manager
        .request_to_join(&id, vec![alice.reveal(&id)], None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::RequestAlreadyRejected));
    assert_eq!(
        owner.manager.get_request(&request_id).await.unwrap().state,
        RequestState::Declined
    );
}

#[tokio::test]
async fn test_canceled_request_is_not_accepted() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let alice = network.node().await;
    let all = [&owner, &alice];

    let community = community(&owner, AccessPolicy::OnRequest, &[&alice]).await;
    let id = community.id();
    join(&alice, &id, &all).await;

    let canceled = alice.manager.cancel_request_to_join(&id).await.unwrap();
    assert_eq!(canceled.state, RequestState::Canceled);
    pump(&all).await;

    let request = owner.manager.get_request(&canceled.id).await.unwrap();
    assert_eq!(request.state, RequestState::Canceled);
    assert_eq!(request.clock, canceled.clock);
    assert!(matches!(
        owner.manager.accept_request_to_join(&canceled.id).await,
        Err(ManagerError::InvalidOperation(_))
    ));
    assert!(matches!(
        alice.manager.cancel_request_to_join(&id).await,
        Err(ManagerError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_invitation_only_and_banned_requesters_are_refused() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let alice = network.node().await;
    let bob = network.node().await;
    let all = [&owner, &alice, &bob];

    let community = community(&owner, AccessPolicy::AutoAccept, &[&alice, &bob]).await;
    let id = community.id();
    join(&alice, &id, &all).await;

    owner
        .manager
        .ban_user_from_community(&id, &alice.public_key())
        .await
        .unwrap();
    pump(&all).await;
    assert!(alice.manager.community(&id).unwrap().description.is_banned(&alice.public_key()));
    assert!(matches!(
        alice
            .manager
            .request_to_join(&id, vec![alice.reveal(&id)], None, None)
            .await,
        Err(ManagerError::CannotRequestAccess(_))
    ));

    let mut identity = owner.manager.community(&id).unwrap().description.identity.clone();
    identity.description = "closed".into();
    owner
        .manager
        .edit_community(&id, identity, common::access(AccessPolicy::InvitationOnly))
        .await
        .unwrap();
    pump(&all).await;
    assert!(matches!(
        bob.manager
            .request_to_join(&id, vec![bob.reveal(&id)], None, None)
            .await,
        Err(ManagerError::CannotRequestAccess(_))
    ));

    assert!(owner
        .manager
        .unban_user_from_community(&id, &alice.public_key())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_token_master_decision_is_finalized_by_control_node() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let master = network.node().await;
    let alice = network.node().await;
    let all = [&owner, &master, &alice];

    let community = community(&owner, AccessPolicy::OnRequest, &[]).await;
    let id = community.id();
    owner
        .manager
        .create_token_permission(&id, member_permission(PermissionType::BecomeTokenMaster, 1_000))
        .await
        .unwrap();
    let current = owner.manager.community(&id).unwrap();
    for node in [&master, &alice] {
        node.manager.spectate_community(current.signed.clone()).await.unwrap();
    }

    network.fund(&master, tokens(1_000));
    join(&master, &id, &all).await;
    let master_request = RequestId::derive(&master.public_key(), &id);
    owner.manager.accept_request_to_join(&master_request).await.unwrap();
    pump(&all).await;
    assert_eq!(
        master.manager.privilege_of(&id, &master.public_key()).unwrap(),
        Privilege::TokenMaster
    );

    join(&alice, &id, &all).await;
    let alice_request = RequestId::derive(&alice.public_key(), &id);
    let seen = master.manager.get_request(&alice_request).await.unwrap();
    assert_eq!(seen.state, RequestState::Pending);
    assert_eq!(seen.revealed_accounts.len(), 1);
    assert!(!seen.our);

    let forwarded = master.manager.accept_request_to_join(&alice_request).await.unwrap();
    assert_eq!(forwarded.state, RequestState::AcceptedPending);
    assert!(!owner.manager.community(&id).unwrap().description.has_member(&alice.public_key()));
    pump(&all).await;

    assert!(owner.manager.community(&id).unwrap().description.has_member(&alice.public_key()));
    assert_eq!(
        owner.manager.get_request(&alice_request).await.unwrap().state,
        RequestState::Accepted
    );
    assert_eq!(
        master.manager.get_request(&alice_request).await.unwrap().state,
        RequestState::Accepted
    );
    assert!(alice.manager.community(&id).unwrap().joined);

    // Members cannot decide, and privileged members cannot be kicked.
    assert!(matches!(
        alice.manager.decline_request_to_join(&alice_request).await,
        Err(ManagerError::Unauthorized(_))
    ));
    assert!(matches!(
        owner
            .manager
            .remove_user_from_community(&id, &master.public_key())
            .await,
        Err(ManagerError::RoleConstraintViolation(RoleViolation::CannotRemoveOwnerOrAdmin))
    ));
}

#[tokio::test]
async fn test_privileged_sync_only_from_control_node() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let master = network.node().await;
    let alice = network.node().await;
    let all = [&owner, &master, &alice];

    let community = community(&owner, AccessPolicy::AutoAccept, &[&master, &alice]).await;
    let id = community.id();
    join(&master, &id, &all).await;
    owner
        .manager
        .add_role_to_member(&id, &master.public_key(), cohort::MemberRole::TokenMaster)
        .await
        .unwrap();
    pump(&all).await;

    let mut request = RequestToJoin::new(alice.public_key(), id, 10, vec![alice.reveal(&id)]);
    request.state = RequestState::Accepted;
    let sync = PrivilegedSync {
        community_id: id,
        clock: 10,
        kind: PrivilegedSyncKind::AcceptRequest,
        requests: vec![request],
    };

    let forged = SignedEnvelope::seal(&ProtocolMessage::PrivilegedUserSync(sync.clone()), &alice.identity).unwrap();
    assert!(matches!(
        master.manager.handle_envelope(forged).await,
        Err(ManagerError::Unauthorized(_))
    ));

    let empty = PrivilegedSync {
        requests: Vec::new(),
        ..sync.clone()
    };
    let malformed = SignedEnvelope::seal(&ProtocolMessage::PrivilegedUserSync(empty), &owner.identity).unwrap();
    assert!(matches!(
        master.manager.handle_envelope(malformed).await,
        Err(ManagerError::MalformedSync(_))
    ));

    let genuine = SignedEnvelope::seal(&ProtocolMessage::PrivilegedUserSync(sync), &owner.identity).unwrap();
    assert_eq!(master.manager.handle_envelope(genuine).await.unwrap(), ApplyOutcome::Handled);
    let stored = master
        .manager
        .get_request(&RequestId::derive(&alice.public_key(), &id))
        .await
        .unwrap();
    assert_eq!(stored.state, RequestState::Accepted);
    assert_eq!(stored.clock, 10);
}

#[tokio::test]
async fn test_stale_and_forged_descriptions() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let alice = network.node().await;
    let all = [&owner, &alice];

    let community = community(&owner, AccessPolicy::AutoAccept, &[&alice]).await;
    let id = community.id();
    let first = community.signed.clone();
    join(&alice, &id, &all).await;
    let current = alice.manager.community(&id).unwrap().clock();
    assert!(current > 1);

    let replay = ProtocolMessage::Description {
        community_id: id,
        description: first.clone(),
    };
    let outcome = alice
        .manager
        .handle_envelope(SignedEnvelope::seal(&replay, &owner.identity).unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Stale { current, incoming: 1 });
    assert_eq!(alice.manager.community(&id).unwrap().clock(), current);

    // Only the control node named in the description may send it.
    let relayed = SignedEnvelope::seal(&replay, &alice.identity).unwrap();
    let stranger = network.node().await;
    stranger.manager.spectate_community(first).await.unwrap();
    assert!(matches!(
        stranger.manager.handle_envelope(relayed).await,
        Err(ManagerError::Unauthorized(_))
    ));

    // Our own broadcasts and unknown communities are ignored.
    let own = SignedEnvelope::seal(&replay, &alice.identity).unwrap();
    assert_eq!(alice.manager.handle_envelope(own).await.unwrap(), ApplyOutcome::Ignored);
}

#[tokio::test]
async fn test_reversed_decline_reaches_token_masters() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let master = network.node().await;
    let alice = network.node().await;
    let all = [&owner, &master, &alice];

    let community = community(&owner, AccessPolicy::OnRequest, &[&master, &alice]).await;
    let id = community.id();
    join(&master, &id, &all).await;
    owner
        .manager
        .accept_request_to_join(&RequestId::derive(&master.public_key(), &id))
        .await
        .unwrap();
    owner
        .manager
        .add_role_to_member(&id, &master.public_key(), cohort::MemberRole::TokenMaster)
        .await
        .unwrap();
    pump(&all).await;
    assert_eq!(
        master.manager.privilege_of(&id, &master.public_key()).unwrap(),
        Privilege::TokenMaster
    );

    join(&alice, &id, &all).await;
    let request_id = RequestId::derive(&alice.public_key(), &id);
    let declined = owner.manager.decline_request_to_join(&request_id).await.unwrap();
    pump(&all).await;
    assert_eq!(
        master.manager.get_request(&request_id).await.unwrap().state,
        RequestState::Declined
    );

    let accepted = owner.manager.accept_request_to_join(&request_id).await.unwrap();
    assert_eq!(accepted.state, RequestState::Accepted);
    assert!(accepted.clock > declined.clock);
    pump(&all).await;

    let replica = master.manager.get_request(&request_id).await.unwrap();
    assert_eq!(replica.state, RequestState::Accepted);
    assert_eq!(replica.clock, accepted.clock);
    let own = alice.manager.get_request(&request_id).await.unwrap();
    assert_eq!(own.state, RequestState::Accepted);
    assert_eq!(own.clock, accepted.clock);
    assert!(alice.manager.community(&id).unwrap().joined);
}

#[tokio::test]
async fn test_reveal_signed_for_another_identity_is_rejected() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let alice = network.node().await;
    let mallory = network.node().await;

    let community = community(&owner, AccessPolicy::AutoAccept, &[]).await;
    let id = community.id();
    owner
        .manager
        .create_token_permission(&id, member_permission(PermissionType::BecomeMember, 10))
        .await
        .unwrap();
    let gated = owner.manager.community(&id).unwrap();
    alice.manager.spectate_community(gated.signed.clone()).await.unwrap();
    network.fund(&alice, tokens(10));

    // The funded wallet vouches for mallory, not for alice.
    let misbound = alice.wallet.reveal(&mallory.public_key(), &id);
    assert!(matches!(
        alice
            .manager
            .request_to_join(&id, vec![misbound.clone()], None, None)
            .await,
        Err(ManagerError::Unauthorized(_))
    ));
    assert!(alice.manager.requests(&id, None).await.unwrap().is_empty());

    let request = RequestToJoin::new(alice.public_key(), id, 1, vec![misbound]);
    let envelope = SignedEnvelope::seal(&ProtocolMessage::RequestToJoin { request }, &alice.identity).unwrap();
    assert!(matches!(
        owner.manager.handle_envelope(envelope).await,
        Err(ManagerError::Unauthorized(_))
    ));
    assert!(owner.manager.requests(&id, None).await.unwrap().is_empty());
    assert!(!owner.manager.community(&id).unwrap().description.has_member(&alice.public_key()));
}
