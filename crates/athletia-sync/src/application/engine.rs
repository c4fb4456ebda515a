//! # Reconciliation Engine
//!
//! Orchestrates the historical sync and the live listeners, and is the
//! only writer of the reconciled view.
//!
//! ## Merge rules
//!
//! | Source | Field | Rule |
//! |--------|-------|------|
//! | bootstrap / refresh | all three | independent fetches, failures isolated |
//! | root-change log | `last_root_update` | `max(current, resolved)` |
//! | new block | `minted_count` | overwrite with the fresh read |
//!
//! ## Post-mint policy
//!
//! `trigger_mint` never refreshes anything itself. The new count arrives
//! through the block listener like any other supply change.

use async_trait::async_trait;
use primitive_types::{H160, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use super::session::ConnectionSession;
use super::store::{StateStore, WriteScope};
use crate::algorithms::{bounded_call, u256_to_u64, EventRangeResolver};
use crate::config::{SyncConfig, WatchedContracts};
use crate::domain::{
    BootstrapReport, ContractMethod, EventFilter, FieldFailure, NewBlock, RootChangeEvent,
    RootUpdate, SessionId, SyncError, SyncField, SyncSignal, SyncState,
};
use crate::ports::{BlockReceiver, LogReceiver, NodeConnection, ReconciliationApi};

/// Reconciliation engine - sole owner of `SyncState`.
pub struct ReconciliationEngine {
    /// Configuration.
    config: SyncConfig,
    /// Validated contract addresses.
    contracts: WatchedContracts,
    /// Latest root-change search.
    resolver: EventRangeResolver,
    /// Reconciled view.
    store: Arc<StateStore>,
    /// Current live session, if any. Serialises attach/detach.
    current: Mutex<Option<Arc<ConnectionSession>>>,
}

impl ReconciliationEngine {
    /// Create an engine. Fails on missing contract addresses.
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let contracts = config.validate()?;
        let resolver = EventRangeResolver::from_config(&config);
        let store = Arc::new(StateStore::new(config.signal_capacity));
        Ok(Self {
            config,
            contracts,
            resolver,
            store,
            current: Mutex::new(None),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Watched contract addresses.
    pub fn contracts(&self) -> WatchedContracts {
        self.contracts
    }

    /// Filter for root-change logs of the Merkle tree contract.
    pub fn root_filter(&self) -> EventFilter {
        EventFilter::root_changed(self.contracts.merkle)
    }

    /// Receiver of published snapshots.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.store.subscribe()
    }

    /// Published snapshots as a stream. Yields the current snapshot first.
    pub fn state_stream(&self) -> WatchStream<SyncState> {
        WatchStream::new(self.store.subscribe())
    }

    /// Receiver of recoverable-failure signals.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<SyncSignal> {
        self.store.subscribe_signals()
    }

    /// Current live session, if one is attached.
    pub async fn active_session(&self) -> Option<Arc<ConnectionSession>> {
        self.current
            .lock()
            .await
            .as_ref()
            .filter(|session| session.is_attached())
            .cloned()
    }

    /// Detach whatever session is live. Used on shutdown.
    pub async fn shutdown(&self) {
        let mut current = self.current.lock().await;
        if let Some(session) = current.take() {
            self.close_session(&session).await;
        }
    }

    fn listener_context(&self, session: SessionId, node: Arc<dyn NodeConnection>) -> ListenerContext {
        ListenerContext {
            session,
            node,
            store: Arc::clone(&self.store),
            issuance: self.contracts.issuance,
            call_timeout: self.config.call_timeout(),
        }
    }

    /// Run the three independent fetches, applying each as it completes.
    async fn refresh_fields(&self, node: &dyn NodeConnection) -> BootstrapReport {
        let timeout = self.config.call_timeout();
        let issuance = self.contracts.issuance;

        let minted = async {
            let result = read_count(node, issuance, ContractMethod::TotalSupply, timeout).await;
            self.settle(SyncField::MintedCount, result, |store, value| {
                store.set_minted_count(WriteScope::Refresh, value);
            })
        };
        let max_supply = async {
            let result = read_count(node, issuance, ContractMethod::MaxSupply, timeout).await;
            self.settle(SyncField::MaxSupply, result, |store, value| {
                store.set_max_supply(WriteScope::Refresh, value);
            })
        };
        let root = async {
            let result = self.latest_root_update(node).await;
            self.settle(SyncField::LastRootUpdate, result, |store, update| {
                store.merge_root_update(WriteScope::Refresh, update);
            })
        };

        let (minted, max_supply, root) = tokio::join!(minted, max_supply, root);
        let failures = [minted, max_supply, root].into_iter().flatten().collect();

        BootstrapReport {
            state: self.store.snapshot(),
            failures,
        }
    }

    /// Apply a fetch result or record its failure.
    fn settle<T>(
        &self,
        field: SyncField,
        result: Result<T, SyncError>,
        apply: impl FnOnce(&StateStore, T),
    ) -> Option<FieldFailure> {
        match result {
            Ok(value) => {
                apply(&self.store, value);
                None
            }
            Err(error) => {
                warn!(field = %field, error = %error, "[sync] Fetch failed, keeping last known value");
                self.store
                    .record_failure(WriteScope::Refresh, field, error.clone());
                Some(FieldFailure { field, error })
            }
        }
    }

    /// Latest root update from history; `Never` when nothing was found.
    async fn latest_root_update(&self, node: &dyn NodeConnection) -> Result<RootUpdate, SyncError> {
        match self.resolver.find_latest(node, &self.root_filter()).await? {
            Some(event) => {
                let timestamp = bounded_call(
                    "get_block_timestamp",
                    self.config.call_timeout(),
                    node.get_block_timestamp(event.block_hash),
                )
                .await?;
                Ok(RootUpdate::At(timestamp))
            }
            None => {
                info!(
                    windows = ?self.resolver.windows(),
                    "[sync] No root update in searched history"
                );
                Ok(RootUpdate::Never)
            }
        }
    }

    /// Register both live feeds. Either both exist or neither does.
    async fn open_feeds(
        &self,
        node: &dyn NodeConnection,
    ) -> Result<(LogReceiver, BlockReceiver), SyncError> {
        let timeout = self.config.call_timeout();
        let logs = bounded_call("subscribe", timeout, node.subscribe(&self.root_filter())).await?;
        let blocks = bounded_call("subscribe_blocks", timeout, node.subscribe_blocks()).await?;
        Ok((logs, blocks))
    }

    async fn close_session(&self, session: &ConnectionSession) {
        // Revoke write access first: in-flight callbacks are suppressed
        // from here on even if they complete before the tasks are aborted.
        self.store.deactivate(session.id());
        if session.close().await {
            info!(session = %session.id(), "[sync] Session detached");
        } else {
            debug!(session = %session.id(), "[sync] Session already detached");
        }
    }
}

#[async_trait]
impl ReconciliationApi for ReconciliationEngine {
    async fn bootstrap(&self, node: &dyn NodeConnection) -> BootstrapReport {
        info!(connection = %node.connection_id(), "[sync] Starting historical sync");
        let report = self.refresh_fields(node).await;
        info!(
            minted = report.state.minted_count.value,
            max_supply = report.state.max_supply.value,
            remaining = ?report.state.remaining_supply(),
            last_root_update = ?report.state.last_root_update.value,
            failures = report.failures.len(),
            "[sync] Historical sync finished"
        );
        report
    }

    async fn refresh(&self, node: &dyn NodeConnection) -> BootstrapReport {
        debug!(connection = %node.connection_id(), "[sync] Manual refresh");
        self.refresh_fields(node).await
    }

    async fn attach(
        &self,
        node: Arc<dyn NodeConnection>,
    ) -> Result<Arc<ConnectionSession>, SyncError> {
        let mut current = self.current.lock().await;

        if let Some(existing) = current.take() {
            if existing.is_attached() && existing.connection_id() == node.connection_id() {
                debug!(session = %existing.id(), "[sync] Connection already attached");
                *current = Some(Arc::clone(&existing));
                return Ok(existing);
            }
            info!(
                previous = %existing.connection_id(),
                next = %node.connection_id(),
                "[sync] Connection changed, replacing session"
            );
            self.close_session(&existing).await;
        }

        let session = Arc::new(ConnectionSession::new(Arc::clone(&node)));
        let (logs, blocks) = match self.open_feeds(node.as_ref()).await {
            Ok(feeds) => feeds,
            Err(e) => {
                warn!(error = %e, "[sync] Failed to register live listeners");
                session.close().await;
                return Err(e);
            }
        };

        self.store.activate(session.id());
        let ctx = Arc::new(self.listener_context(session.id(), Arc::clone(&node)));
        let listeners = vec![
            tokio::spawn(run_root_listener(
                Arc::clone(&ctx),
                logs,
                session.shutdown_signal(),
            )),
            tokio::spawn(run_block_listener(ctx, blocks, session.shutdown_signal())),
        ];

        if let Err(e) = session.mark_attached(listeners) {
            self.store.deactivate(session.id());
            return Err(e);
        }

        info!(
            session = %session.id(),
            connection = %session.connection_id(),
            "[sync] Session attached"
        );
        *current = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn detach(&self, session: &ConnectionSession) {
        let mut current = self.current.lock().await;
        self.close_session(session).await;
        if current.as_ref().map(|s| s.id()) == Some(session.id()) {
            *current = None;
        }
    }

    async fn trigger_mint(
        &self,
        node: &dyn NodeConnection,
        recipient: H160,
    ) -> Result<H256, SyncError> {
        let tx_hash = bounded_call(
            "submit_mint",
            self.config.call_timeout(),
            node.submit_mint(self.contracts.issuance, recipient),
        )
        .await?;
        info!(
            tx = ?tx_hash,
            recipient = ?recipient,
            "[sync] Mint submitted; minted count follows block updates"
        );
        Ok(tx_hash)
    }

    fn get_state(&self) -> SyncState {
        self.store.snapshot()
    }
}

/// Everything a listener task needs, detached from the engine's lifetime.
struct ListenerContext {
    session: SessionId,
    node: Arc<dyn NodeConnection>,
    store: Arc<StateStore>,
    issuance: H160,
    call_timeout: Duration,
}

async fn read_count(
    node: &dyn NodeConnection,
    contract: H160,
    method: ContractMethod,
    timeout: Duration,
) -> Result<u64, SyncError> {
    let value = bounded_call(
        "read_contract_value",
        timeout,
        node.read_contract_value(contract, method),
    )
    .await?;
    u256_to_u64(value)
}

async fn run_root_listener(
    ctx: Arc<ListenerContext>,
    mut logs: LogReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = logs.recv() => match event {
                Some(event) => {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move { apply_root_change(&ctx, event).await });
                }
                None => {
                    feed_closed(&ctx, SyncField::LastRootUpdate);
                    break;
                }
            },
        }
    }
}

async fn run_block_listener(
    ctx: Arc<ListenerContext>,
    mut blocks: BlockReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            block = blocks.recv() => match block {
                Some(block) => {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move { apply_new_block(&ctx, block).await });
                }
                None => {
                    feed_closed(&ctx, SyncField::MintedCount);
                    break;
                }
            },
        }
    }
}

/// A feed ended without a detach. Suppressed once the session is gone.
fn feed_closed(ctx: &ListenerContext, field: SyncField) {
    if ctx.store.record_failure(
        WriteScope::Session(ctx.session),
        field,
        SyncError::SubscriptionClosed,
    ) {
        warn!(session = %ctx.session, field = %field, "[sync] Live feed closed by node");
    }
}

async fn apply_root_change(ctx: &ListenerContext, event: RootChangeEvent) {
    let scope = WriteScope::Session(ctx.session);
    match bounded_call(
        "get_block_timestamp",
        ctx.call_timeout,
        ctx.node.get_block_timestamp(event.block_hash),
    )
    .await
    {
        Ok(timestamp) => {
            if ctx.store.merge_root_update(scope, RootUpdate::At(timestamp)) {
                debug!(
                    session = %ctx.session,
                    block = event.emitted_at.block_number,
                    timestamp,
                    "[sync] Root change merged"
                );
            }
        }
        Err(e) => {
            warn!(session = %ctx.session, error = %e, "[sync] Root change block lookup failed");
            ctx.store.record_failure(scope, SyncField::LastRootUpdate, e);
        }
    }
}

async fn apply_new_block(ctx: &ListenerContext, block: NewBlock) {
    let scope = WriteScope::Session(ctx.session);
    match read_count(
        ctx.node.as_ref(),
        ctx.issuance,
        ContractMethod::TotalSupply,
        ctx.call_timeout,
    )
    .await
    {
        Ok(minted) => {
            if ctx.store.set_minted_count(scope, minted) {
                debug!(session = %ctx.session, block = block.number, minted, "[sync] Minted count refreshed");
            }
        }
        Err(e) => {
            warn!(session = %ctx.session, block = block.number, error = %e, "[sync] Minted count read failed");
            ctx.store.record_failure(scope, SyncField::MintedCount, e);
        }
    }
}
