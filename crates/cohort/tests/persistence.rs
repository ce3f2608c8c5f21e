//! Communities survive a restart on the SQLite store.

mod common;

use std::sync::Arc;

use cohort::core::{AccessPolicy, Chat, CommunityIdentity, Keypair, PermissionType};
use cohort::perms::StaticBalances;
use cohort::store::{SqliteStore, Store};
use cohort::sync::MemoryNetwork;
use cohort::{Manager, ManagerConfig};
use cohort_testkit::{member_permission, TEST_CHAIN};

use common::{access, init_tracing};

#[tokio::test]
async fn test_reload_restores_control() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cohort.db");
    let identity = Keypair::generate();
    let network = MemoryNetwork::new();
    let balances = Arc::new(StaticBalances::new([TEST_CHAIN]));

    let (id, before) = {
        let transport = network.create_transport(identity.public_key()).await;
        let manager = Manager::new(
            identity.clone(),
            SqliteStore::open(&path).unwrap(),
            transport,
            balances.clone(),
            ManagerConfig::default(),
        );
        let community = manager
            .create_community(CommunityIdentity::named("durable"), access(AccessPolicy::OnRequest))
            .await
            .unwrap();
        let id = community.id();
        manager.create_chat(&id, Chat::new("general")).await.unwrap();
        manager
            .create_token_permission(&id, member_permission(PermissionType::BecomeMember, 5))
            .await
            .unwrap();
        (id, manager.community(&id).unwrap().description.clone())
    };
    assert!(network.disconnect(&identity.public_key()).await);

    let transport = network.create_transport(identity.public_key()).await;
    let manager = Manager::new(
        identity,
        SqliteStore::open(&path).unwrap(),
        transport,
        balances,
        ManagerConfig::default(),
    );
    assert_eq!(manager.load_communities().await.unwrap(), 1);

    let restored = manager.community(&id).unwrap();
    assert_eq!(restored.description, before);
    assert!(restored.joined);
    assert!(restored.has_community_key());
    assert_eq!(manager.store().description_clocks(&id).await.unwrap().last(), Some(&before.clock));

    let category = manager.create_category(&id, "lounge", &[]).await.unwrap();
    let after = manager.community(&id).unwrap();
    assert_eq!(after.clock(), before.clock + 1);
    assert!(after.description.categories.contains_key(&category));
}
