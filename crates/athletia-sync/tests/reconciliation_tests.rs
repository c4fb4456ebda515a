//! # Reconciliation Integration Tests
//!
//! Drive the engine end to end against the in-memory node: historical
//! sync, live listeners, session teardown and the merge laws.

use std::sync::Arc;
use std::time::Duration;

use athletia_sync::{
    BootstrapReport, CallKind, ContractMethod, Freshness, InMemoryNode, LogPosition,
    NodeConnection, ReconciliationApi, ReconciliationEngine, RootChangeEvent, RootUpdate,
    SyncConfig, SyncError, SyncField, SyncState,
};
use primitive_types::{H160, H256};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_stream::StreamExt;

const WAIT: Duration = Duration::from_secs(2);

fn issuance() -> H160 {
    H160::repeat_byte(0x1a)
}

fn merkle() -> H160 {
    H160::repeat_byte(0x4d)
}

/// Narrow window 1_000 blocks, wide window 100_000 blocks.
fn engine() -> ReconciliationEngine {
    let mut config = SyncConfig::for_testing(issuance(), merkle());
    config.lookback_windows = vec![1_000, 100_000];
    ReconciliationEngine::new(config).expect("valid config")
}

fn root_change(hash: u8, block: u64) -> RootChangeEvent {
    RootChangeEvent::new(H256::repeat_byte(hash), LogPosition::new(block, 0))
}

async fn wait_for_state<F>(rx: &mut watch::Receiver<SyncState>, condition: F) -> SyncState
where
    F: FnMut(&SyncState) -> bool,
{
    timeout(WAIT, rx.wait_for(condition))
        .await
        .expect("state condition reached within timeout")
        .expect("engine alive")
        .clone()
}

/// Poll until `check` holds; the node records calls synchronously.
async fn until(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached within timeout");
}

fn total_supply_reads(node: &InMemoryNode) -> usize {
    node.read_calls()
        .iter()
        .filter(|m| **m == ContractMethod::TotalSupply)
        .count()
}

// =============================================================================
// Historical sync
// =============================================================================

#[tokio::test]
async fn test_wide_window_event_resolves_to_block_timestamp() {
    let engine = engine();
    let mut signals = engine.subscribe_signals();
    let node = InMemoryNode::with_head(200_000);
    node.set_value(ContractMethod::TotalSupply, 7);
    node.set_value(ContractMethod::MaxSupply, 500);
    // Outside the narrow window, inside the wide one.
    node.record_root_change(merkle(), root_change(0xb1, 150_000), 1_700_000_000);

    let report = engine.bootstrap(&node).await;

    assert!(report.is_complete());
    assert_eq!(
        report.state.last_root_update.value,
        RootUpdate::At(1_700_000_000)
    );
    assert_eq!(node.log_queries(), vec![(199_000, 200_000), (100_000, 200_000)]);
    assert!(signals.try_recv().is_err(), "no error should be signalled");
}

#[tokio::test]
async fn test_no_root_change_anywhere_is_never_not_error() {
    let engine = engine();
    let node = InMemoryNode::with_head(200_000);
    node.set_value(ContractMethod::MaxSupply, 500);

    let report = engine.bootstrap(&node).await;

    assert!(report.failure(SyncField::LastRootUpdate).is_none());
    assert!(report.state.last_root_update.value.is_never());
    assert_eq!(node.log_queries().len(), 2);
}

#[tokio::test]
async fn test_each_failure_reported_independently() {
    let engine = engine();
    let mut signals = engine.subscribe_signals();
    let node = InMemoryNode::with_head(10);
    node.set_value(ContractMethod::MaxSupply, 500);
    node.fail_next(CallKind::Read(ContractMethod::TotalSupply), 1);
    node.fail_next(CallKind::QueryLogs, 1);

    let BootstrapReport { state, failures } = engine.bootstrap(&node).await;

    assert_eq!(failures.len(), 2);
    assert_eq!(state.max_supply.value, 500);
    assert_eq!(state.max_supply.freshness, Freshness::Fresh);
    assert_eq!(state.minted_count.value, 0);
    assert_eq!(state.minted_count.freshness, Freshness::Unavailable);

    let mut signalled = vec![signals.recv().await.unwrap().field, signals.recv().await.unwrap().field];
    signalled.sort_by_key(|field| field.to_string());
    assert_eq!(
        signalled,
        vec![SyncField::LastRootUpdate, SyncField::MintedCount]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stalled_node_times_out_instead_of_hanging() {
    let engine = engine();
    let node = InMemoryNode::with_head(10);
    let _gate = node.hold(CallKind::Read(ContractMethod::MaxSupply));

    let report = engine.bootstrap(&node).await;

    assert!(matches!(
        report.failure(SyncField::MaxSupply),
        Some(SyncError::Timeout { .. })
    ));
    assert!(report.failure(SyncField::MintedCount).is_none());
}

#[test]
fn test_missing_address_prevents_engine_creation() {
    let config = SyncConfig {
        merkle_contract: Some(merkle()),
        ..SyncConfig::default()
    };
    let result = ReconciliationEngine::new(config);
    assert!(matches!(result, Err(SyncError::Config(_))));
}

// =============================================================================
// Live listeners
// =============================================================================

#[tokio::test]
async fn test_failed_read_then_block_update_goes_straight_to_42() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(10));
    node.set_value(ContractMethod::TotalSupply, 42);
    node.fail_next(CallKind::Read(ContractMethod::TotalSupply), 1);

    let report = engine.bootstrap(node.as_ref()).await;
    assert!(report.failure(SyncField::MintedCount).is_some());
    assert_eq!(report.state.minted_count.value, 0);

    let mut history = engine.state_stream();
    let mut rx = engine.subscribe_state();
    engine.attach(node.clone()).await.unwrap();
    node.mine_block();

    let state = wait_for_state(&mut rx, |s| s.minted_count.value == 42).await;
    assert_eq!(state.minted_count.freshness, Freshness::Fresh);

    engine.shutdown().await;
    let mut seen = Vec::new();
    while let Ok(Some(snapshot)) = timeout(Duration::from_millis(50), history.next()).await {
        seen.push(snapshot.minted_count.value);
    }
    assert!(seen.iter().all(|v| *v == 0 || *v == 42), "saw {seen:?}");
}

#[tokio::test]
async fn test_live_root_change_is_merged() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(10));
    let mut rx = engine.subscribe_state();
    engine.attach(node.clone()).await.unwrap();

    node.emit_root_change(merkle(), root_change(1, 11), 1_700_000_100);

    let state = wait_for_state(&mut rx, |s| !s.last_root_update.value.is_never()).await;
    assert_eq!(state.last_root_update.value, RootUpdate::At(1_700_000_100));
}

#[tokio::test]
async fn test_live_root_change_never_regresses() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(200));
    node.record_root_change(merkle(), root_change(1, 190), 2_000);
    engine.bootstrap(node.as_ref()).await;

    let mut rx = engine.subscribe_state();
    engine.attach(node.clone()).await.unwrap();

    // Arrives late with an older timestamp.
    node.emit_root_change(merkle(), root_change(2, 150), 1_000);
    node.emit_root_change(merkle(), root_change(3, 201), 3_000);

    wait_for_state(&mut rx, |s| s.last_root_update.value == RootUpdate::At(3_000)).await;
    node.emit_root_change(merkle(), root_change(4, 120), 500);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.get_state().last_root_update.value, RootUpdate::At(3_000));
}

#[tokio::test]
async fn test_slow_history_lookup_does_not_regress_live_update() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(200));
    node.record_root_change(merkle(), root_change(1, 190), 1_000);
    let mut rx = engine.subscribe_state();
    let gate = node.hold(CallKind::QueryLogs);

    let (report, ()) = tokio::join!(engine.bootstrap(node.as_ref()), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.attach(node.clone()).await.unwrap();
        node.emit_root_change(merkle(), root_change(2, 201), 3_000);
        wait_for_state(&mut rx, |s| s.last_root_update.value == RootUpdate::At(3_000)).await;
        // History now resolves the older change at block 190.
        gate.release();
    });

    assert!(report.is_complete());
    assert_eq!(report.state.last_root_update.value, RootUpdate::At(3_000));
    assert_eq!(engine.get_state().last_root_update.value, RootUpdate::At(3_000));
    assert_eq!(node.log_queries(), vec![(0, 200)]);
}

#[tokio::test]
async fn test_mint_is_observed_through_block_listener_only() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(10));
    node.set_value(ContractMethod::TotalSupply, 3);
    engine.bootstrap(node.as_ref()).await;
    engine.attach(node.clone()).await.unwrap();
    let revision = engine.get_state().revision;

    let recipient = H160::repeat_byte(0xee);
    engine.trigger_mint(node.as_ref(), recipient).await.unwrap();
    assert_eq!(engine.get_state().revision, revision);
    assert_eq!(engine.get_state().minted_count.value, 3);

    let mut rx = engine.subscribe_state();
    node.mine_block();
    let state = wait_for_state(&mut rx, |s| s.minted_count.value == 4).await;
    assert!(state.revision > revision);
}

#[tokio::test]
async fn test_overlapping_block_reads_keep_last_completed() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(10));
    engine.attach(node.clone()).await.unwrap();
    let mut rx = engine.subscribe_state();

    // The first read answers 5 but completes after the second.
    node.set_value(ContractMethod::TotalSupply, 5);
    let slow = node.hold_next(CallKind::Read(ContractMethod::TotalSupply));
    node.mine_block();
    until(|| total_supply_reads(&node) == 1).await;

    node.set_value(ContractMethod::TotalSupply, 7);
    node.mine_block();
    wait_for_state(&mut rx, |s| s.minted_count.value == 7).await;

    slow.release();
    wait_for_state(&mut rx, |s| s.minted_count.value == 5).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.get_state().minted_count.value, 5);
    assert_eq!(engine.get_state().minted_count.freshness, Freshness::Fresh);
    assert_eq!(total_supply_reads(&node), 2);
}

// =============================================================================
// Session lifecycle
// =============================================================================

#[tokio::test]
async fn test_detach_suppresses_in_flight_block_read() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(10));
    let session = engine.attach(node.clone()).await.unwrap();
    let mut signals = engine.subscribe_signals();
    let before = engine.get_state();

    let gate = node.hold(CallKind::Read(ContractMethod::TotalSupply));
    node.set_value(ContractMethod::TotalSupply, 99);
    node.mine_block();
    until(|| total_supply_reads(&node) == 1).await;

    engine.detach(&session).await;
    gate.release();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.get_state(), before);
    assert!(signals.try_recv().is_err());
}

#[tokio::test]
async fn test_detach_suppresses_in_flight_root_lookup() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(10));
    let session = engine.attach(node.clone()).await.unwrap();

    let gate = node.hold(CallKind::BlockTimestamp);
    node.emit_root_change(merkle(), root_change(5, 11), 1_800_000_000);
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.detach(&session).await;
    gate.release();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(engine.get_state().last_root_update.value.is_never());
}

#[tokio::test]
async fn test_reattach_with_new_connection_leaves_one_session() {
    let engine = engine();
    let first = Arc::new(InMemoryNode::with_head(10));
    let second = Arc::new(InMemoryNode::with_head(10));
    second.set_value(ContractMethod::TotalSupply, 8);

    let old = engine.attach(first.clone()).await.unwrap();
    let new = engine.attach(second.clone()).await.unwrap();

    assert_ne!(old.id(), new.id());
    assert!(!old.is_attached());
    assert!(new.is_attached());
    assert_eq!(first.block_listener_count(), 0);
    assert_eq!(first.log_listener_count(), 0);
    assert_eq!(second.block_listener_count(), 1);

    let mut rx = engine.subscribe_state();
    second.mine_block();
    wait_for_state(&mut rx, |s| s.minted_count.value == 8).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(total_supply_reads(&second), 1, "one read per new block");

    first.mine_block();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(total_supply_reads(&first), 0);

    let active = engine.active_session().await.unwrap();
    assert_eq!(active.id(), new.id());
}

#[tokio::test]
async fn test_detach_twice_is_noop() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(10));
    let session = engine.attach(node.clone()).await.unwrap();

    engine.detach(&session).await;
    engine.detach(&session).await;

    assert!(engine.active_session().await.is_none());
    assert_eq!(node.block_listener_count(), 0);

    // A fresh session is needed to listen again.
    let again = engine.attach(node.clone()).await.unwrap();
    assert_ne!(again.id(), session.id());
    assert_eq!(node.block_listener_count(), 1);
}

#[tokio::test]
async fn test_listener_count_stable_across_reconnects() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(10));

    for _ in 0..5 {
        let replacement = Arc::new(InMemoryNode::with_head(10));
        engine.attach(node.clone()).await.unwrap();
        engine.attach(replacement.clone()).await.unwrap();
        assert_eq!(replacement.block_listener_count(), 1);
    }
    assert_eq!(node.block_listener_count(), 0);
}

#[tokio::test]
async fn test_shutdown_detaches_live_session() {
    let engine = engine();
    let node = Arc::new(InMemoryNode::with_head(10));
    let session = engine.attach(node.clone()).await.unwrap();

    engine.shutdown().await;

    assert!(!session.is_attached());
    assert_eq!(node.connection_id(), session.connection_id());
    assert_eq!(node.block_listener_count(), 0);
}
