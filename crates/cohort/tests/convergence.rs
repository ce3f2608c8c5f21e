//! Replicas converge on the latest description whatever order updates arrive in.

use cohort::sync::{compare_descriptions, ProtocolMessage, SignedEnvelope};
use cohort::ApplyOutcome;
use cohort_testkit::generators::{signed_history, SignedHistory};
use cohort_testkit::TestNetwork;
use proptest::prelude::*;

fn history_and_order() -> impl Strategy<Value = (SignedHistory, Vec<usize>)> {
    signed_history(8).prop_flat_map(|history| {
        let order: Vec<usize> = (1..history.signed.len()).collect();
        (Just(history), Just(order).prop_shuffle())
    })
}

async fn replay(history: &SignedHistory, order: &[usize]) -> cohort::Community {
    let network = TestNetwork::new();
    let spectator = network.node().await;
    let id = history.community_id();
    spectator
        .manager
        .spectate_community(history.signed[0].clone())
        .await
        .unwrap();

    for &i in order {
        let message = ProtocolMessage::Description {
            community_id: id,
            description: history.signed[i].clone(),
        };
        let envelope = SignedEnvelope::seal(&message, &history.control).unwrap();
        let outcome = spectator.manager.handle_envelope(envelope).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied(_) | ApplyOutcome::Stale { .. }));
    }
    (*spectator.manager.community(&id).unwrap()).clone()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_any_arrival_order_converges((history, order) in history_and_order()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let community = runtime.block_on(replay(&history, &order));

        prop_assert_eq!(community.clock(), history.last().clock);
        prop_assert!(compare_descriptions(&community.description, history.last())
            .unwrap()
            .is_converged());
        prop_assert!(!community.joined);
    }
}
