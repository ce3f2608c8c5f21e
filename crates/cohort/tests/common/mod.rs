#![allow(dead_code)]

use cohort::core::{AccessPolicy, AccessSettings, CommunityId, CommunityIdentity};
use cohort::Community;
use cohort_testkit::{pump, TestNode};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn access(policy: AccessPolicy) -> AccessSettings {
    AccessSettings {
        policy,
        ..AccessSettings::default()
    }
}

/// Create a community on `owner` and let every node in `others` spectate it.
pub async fn community(owner: &TestNode, policy: AccessPolicy, others: &[&TestNode]) -> Arc<Community> {
    let community = owner
        .manager
        .create_community(CommunityIdentity::named("cohort"), access(policy))
        .await
        .unwrap();
    for node in others {
        node.manager
            .spectate_community(community.signed.clone())
            .await
            .unwrap();
    }
    community
}

/// Send a request to join from `node` and deliver everything in flight.
pub async fn join(node: &TestNode, id: &CommunityId, all: &[&TestNode]) {
    node.manager
        .request_to_join(id, vec![node.reveal(id)], None, None)
        .await
        .unwrap();
    pump(all).await;
}

pub fn member_count(node: &TestNode, id: &CommunityId) -> usize {
    node.manager.community(id).unwrap().description.members.len()
}
