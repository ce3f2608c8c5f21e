//! End-to-end membership scenarios over the in-memory network.

mod common;

use cohort::core::{AccessPolicy, PermissionType};
use cohort::sync::{compare_descriptions, CommunityEvent};
use cohort::{ManagerError, MemberRole, Privilege, RequestState};
use cohort_testkit::{member_permission, pump, tokens, TestNetwork, Wallet};

use common::{community, init_tracing, join, member_count};

#[tokio::test]
async fn test_gated_join_requires_balance() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let alice = network.node().await;
    let all = [&owner, &alice];

    let community = community(&owner, AccessPolicy::AutoAccept, &[]).await;
    let id = community.id();
    owner
        .manager
        .create_token_permission(&id, member_permission(PermissionType::BecomeMember, 100))
        .await
        .unwrap();
    let gated = owner.manager.community(&id).unwrap();
    alice.manager.spectate_community(gated.signed.clone()).await.unwrap();

    let err = alice
        .manager
        .request_to_join(&id, vec![alice.reveal(&id)], None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::PermissionNotSatisfied));
    assert!(alice.manager.requests(&id, None).await.unwrap().is_empty());
    pump(&all).await;
    assert!(owner.manager.requests(&id, None).await.unwrap().is_empty());

    network.fund(&alice, tokens(100));
    let mut events = alice.manager.subscribe(id);
    let request = alice
        .manager
        .request_to_join(&id, vec![alice.reveal(&id)], None, None)
        .await
        .unwrap();
    assert_eq!(request.state, RequestState::Pending);
    pump(&all).await;

    let request = alice.manager.get_request(&request.id).await.unwrap();
    assert_eq!(request.state, RequestState::Accepted);
    assert_eq!(request.revealed_accounts.len(), 1);
    assert!(request.revealed_accounts[0].is_airdrop_address);

    let accepted = alice
        .manager
        .wait_for(&mut events, |e| {
            matches!(e, CommunityEvent::RequestStateChanged { state: RequestState::Accepted, .. })
        })
        .await;
    assert!(accepted.is_ok());

    let joined = alice.manager.community(&id).unwrap();
    assert!(joined.joined);
    assert_eq!(joined.privilege_of(&alice.public_key()), Privilege::Member);
    let held = owner.manager.community(&id).unwrap();
    assert!(compare_descriptions(&held.description, &joined.description)
        .unwrap()
        .is_converged());
}

#[tokio::test]
async fn test_deleting_stricter_permission_keeps_member_role() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let alice = network.node().await;
    let all = [&owner, &alice];

    let community = community(&owner, AccessPolicy::AutoAccept, &[]).await;
    let id = community.id();
    owner
        .manager
        .create_token_permission(&id, member_permission(PermissionType::BecomeMember, 10))
        .await
        .unwrap();
    let admin_permission = owner
        .manager
        .create_token_permission(&id, member_permission(PermissionType::BecomeAdmin, 1_000))
        .await
        .unwrap();
    let gated = owner.manager.community(&id).unwrap();
    alice.manager.spectate_community(gated.signed.clone()).await.unwrap();

    network.fund(&alice, tokens(50));
    join(&alice, &id, &all).await;
    assert_eq!(owner.manager.privilege_of(&id, &alice.public_key()).unwrap(), Privilege::Member);

    owner
        .manager
        .delete_token_permission(&id, &admin_permission)
        .await
        .unwrap();
    assert!(owner.manager.reevaluate_members(&id).await.unwrap().is_none());
    pump(&all).await;

    for node in all {
        let community = node.manager.community(&id).unwrap();
        let member = community.description.member(&alice.public_key()).unwrap();
        assert!(member.roles.is_empty());
        assert_eq!(community.privilege_of(&alice.public_key()), Privilege::Member);
    }
}

#[tokio::test]
async fn test_reevaluation_removes_members_below_threshold() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let alice = network.node().await;
    let bob = network.node().await;
    let all = [&owner, &alice, &bob];

    let community = community(&owner, AccessPolicy::AutoAccept, &[]).await;
    let id = community.id();
    owner
        .manager
        .create_token_permission(&id, member_permission(PermissionType::BecomeMember, 10))
        .await
        .unwrap();
    owner
        .manager
        .create_token_permission(&id, member_permission(PermissionType::BecomeAdmin, 1_000))
        .await
        .unwrap();
    let gated = owner.manager.community(&id).unwrap();
    for node in [&alice, &bob] {
        node.manager.spectate_community(gated.signed.clone()).await.unwrap();
    }

    network.fund(&alice, tokens(10));
    network.fund(&bob, tokens(1_000));
    join(&alice, &id, &all).await;
    join(&bob, &id, &all).await;
    assert_eq!(owner.manager.privilege_of(&id, &bob.public_key()).unwrap(), Privilege::Admin);

    network.fund(&alice, 0);
    network.fund(&bob, tokens(20));
    let mut events = owner.manager.subscribe(id);
    let changes = owner.manager.reevaluate_members(&id).await.unwrap();
    assert!(changes.is_some());
    pump(&all).await;

    let held = owner.manager.community(&id).unwrap();
    assert!(!held.description.has_member(&alice.public_key()));
    assert_eq!(held.privilege_of(&bob.public_key()), Privilege::Member);
    assert!(!alice.manager.community(&id).unwrap().joined);
    assert!(bob.manager.community(&id).unwrap().joined);

    let kicked = owner
        .manager
        .wait_for(&mut events, |e| matches!(e, CommunityEvent::MemberKicked { .. }))
        .await
        .unwrap();
    assert!(matches!(kicked, CommunityEvent::MemberKicked { member, .. } if member == alice.public_key()));
}

#[tokio::test]
async fn test_handover_readmits_every_member() {
    init_tracing();
    let network = TestNetwork::new();
    let a = network.node().await;
    let b = network.node().await;
    let c = network.node().await;
    let all = [&a, &b, &c];

    let community = community(&a, AccessPolicy::AutoAccept, &[&b, &c]).await;
    let id = community.id();
    join(&b, &id, &all).await;
    join(&c, &id, &all).await;
    assert_eq!(member_count(&a, &id), 3);

    let key = a.manager.export_community_key(&id).unwrap();
    assert!(b.manager.export_community_key(&id).is_err());
    let mut rejoin = a.manager.subscribe(id);
    let promoted = b.manager.promote_self_to_control_node(&id, key).await.unwrap();
    assert_eq!(promoted.control_node(), b.public_key());
    assert_eq!(promoted.description.members.len(), 1);
    assert_eq!(
        b.manager
            .requests(&id, Some(RequestState::AwaitingAddresses))
            .await
            .unwrap()
            .len(),
        2
    );

    // c still holds its accepted request and resubmits on its own.
    pump(&all).await;
    assert!(c.manager.community(&id).unwrap().joined);
    assert!(!a.manager.community(&id).unwrap().joined);
    let asked = a
        .manager
        .wait_for(&mut rejoin, |e| matches!(e, CommunityEvent::RejoinRequested { .. }))
        .await;
    assert!(asked.is_ok());

    join(&a, &id, &all).await;
    for node in all {
        let community = node.manager.community(&id).unwrap();
        assert_eq!(community.description.members.len(), 3);
        assert_eq!(community.control_node(), b.public_key());
        assert!(community.joined);
    }
    assert_eq!(
        b.manager.privilege_of(&id, &a.public_key()).unwrap(),
        Privilege::Member
    );
}

#[tokio::test]
async fn test_restored_control_node_drops_members_without_accounts() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let alice = network.node().await;
    let all = [&owner, &alice];

    let community = community(&owner, AccessPolicy::AutoAccept, &[&alice]).await;
    let id = community.id();
    join(&alice, &id, &all).await;

    let key = owner.manager.export_community_key(&id).unwrap();
    let restored = owner.manager.promote_self_to_control_node(&id, key).await.unwrap();
    assert_eq!(restored.description.members.len(), 2);
    assert_eq!(owner.manager.remove_users_without_revealed_accounts(&id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_address_edit_keeps_granted_admin() {
    init_tracing();
    let network = TestNetwork::new();
    let owner = network.node().await;
    let alice = network.node().await;
    let bob = network.node().await;
    let all = [&owner, &alice, &bob];

    let community = community(&owner, AccessPolicy::AutoAccept, &[]).await;
    let id = community.id();
    owner
        .manager
        .create_token_permission(&id, member_permission(PermissionType::BecomeMember, 100))
        .await
        .unwrap();
    let gated = owner.manager.community(&id).unwrap();
    for node in [&alice, &bob] {
        node.manager.spectate_community(gated.signed.clone()).await.unwrap();
        network.fund(node, tokens(100));
        join(node, &id, &all).await;
    }
    owner
        .manager
        .add_role_to_member(&id, &alice.public_key(), MemberRole::Admin)
        .await
        .unwrap();
    pump(&all).await;

    for node in [&alice, &bob] {
        let empty = Wallet::new();
        node.manager
            .edit_shared_addresses(&id, vec![empty.reveal(&node.public_key(), &id)], None)
            .await
            .unwrap();
    }
    pump(&all).await;

    let held = owner.manager.community(&id).unwrap();
    assert!(held.description.has_member(&alice.public_key()));
    assert_eq!(held.privilege_of(&alice.public_key()), Privilege::Admin);
    assert!(!held.description.has_member(&bob.public_key()));
    assert!(alice.manager.community(&id).unwrap().joined);
    assert!(!bob.manager.community(&id).unwrap().joined);
}
