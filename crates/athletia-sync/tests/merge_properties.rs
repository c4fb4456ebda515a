//! # Merge Law Properties
//!
//! Live updates applied through a real session, in arbitrary order.

use std::sync::Arc;
use std::time::Duration;

use athletia_sync::{
    ContractMethod, InMemoryNode, LogPosition, ReconciliationApi, ReconciliationEngine,
    RootChangeEvent, RootUpdate, SyncConfig,
};
use primitive_types::{H160, H256};
use proptest::prelude::*;
use tokio::time::timeout;

fn engine() -> ReconciliationEngine {
    ReconciliationEngine::new(SyncConfig::for_testing(
        H160::repeat_byte(0x1a),
        H160::repeat_byte(0x4d),
    ))
    .expect("valid config")
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn block_hash(i: usize) -> H256 {
    let mut hash = H256::zero();
    hash.as_bytes_mut()[..8].copy_from_slice(&(i as u64 + 1).to_be_bytes());
    hash
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_root_update_is_max_of_all_applied(timestamps in prop::collection::vec(1u64..4_000_000_000, 1..12)) {
        let final_value = runtime().block_on(async {
            let engine = engine();
            let node = Arc::new(InMemoryNode::with_head(100));
            let mut rx = engine.subscribe_state();
            engine.attach(node.clone()).await.unwrap();

            let expected = RootUpdate::At(*timestamps.iter().max().unwrap());
            for (i, ts) in timestamps.iter().enumerate() {
                let event = RootChangeEvent::new(block_hash(i), LogPosition::new(101 + i as u64, 0));
                node.emit_root_change(H160::repeat_byte(0x4d), event, *ts);
            }

            let mut observed = Vec::new();
            timeout(Duration::from_secs(2), rx.wait_for(|s| {
                observed.push(s.last_root_update.value);
                s.last_root_update.value == expected
            }))
            .await
            .expect("max reached")
            .expect("engine alive");

            tokio::time::sleep(Duration::from_millis(10)).await;
            engine.shutdown().await;

            // Every snapshot observed along the way is ordered.
            assert!(observed.windows(2).all(|w| w[0] <= w[1]));
            (engine.get_state().last_root_update.value, expected)
        });
        prop_assert_eq!(final_value.0, final_value.1);
    }

    #[test]
    fn prop_minted_count_follows_most_recent_read(values in prop::collection::vec(0u64..10_000, 1..8)) {
        let (last_seen, expected) = runtime().block_on(async {
            let engine = engine();
            let node = Arc::new(InMemoryNode::with_head(100));
            let mut rx = engine.subscribe_state();
            engine.attach(node.clone()).await.unwrap();

            for value in &values {
                node.set_value(ContractMethod::TotalSupply, *value);
                let block = node.mine_block();
                let target = *value;
                timeout(Duration::from_secs(2), rx.wait_for(|s| {
                    s.minted_count.value == target && s.revision > 0
                }))
                .await
                .unwrap_or_else(|_| panic!("block {} not applied", block.number))
                .expect("engine alive");
            }

            engine.shutdown().await;
            (engine.get_state().minted_count.value, *values.last().unwrap())
        });
        prop_assert_eq!(last_seen, expected);
    }
}
