//! In-Memory Node Adapter
//!
//! Scriptable `NodeConnection` backed by local state. Used by tests and by
//! offline runs of the runtime.
//!
//! Calls can be made to fail (`fail_next`) or to block until released
//! (`hold`, `hold_next`), which is how callback races against `detach` and
//! out-of-order completions are reproduced. A contract read answers with the
//! value current when the call starts, however long it is held.

use crate::domain::{
    keccak256, ConnectionId, ContractMethod, EventFilter, NewBlock, RootChangeEvent, SyncError,
    ROOT_CHANGED_SIGNATURE,
};
use crate::ports::outbound::{BlockReceiver, LogReceiver, NodeConnection, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use parking_lot::Mutex;
use primitive_types::{H160, H256, U256};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Node calls that can be failed or held.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `read_contract_value` for one method.
    Read(ContractMethod),
    /// `query_logs`.
    QueryLogs,
    /// `get_block_timestamp`.
    BlockTimestamp,
    /// `submit_mint`.
    SubmitMint,
    /// `subscribe`.
    Subscribe,
    /// `subscribe_blocks`.
    SubscribeBlocks,
}

impl CallKind {
    fn rpc_name(&self) -> &'static str {
        match self {
            CallKind::Read(_) => "eth_call",
            CallKind::QueryLogs => "eth_getLogs",
            CallKind::BlockTimestamp => "eth_getBlockByHash",
            CallKind::SubmitMint => "eth_sendTransaction",
            CallKind::Subscribe | CallKind::SubscribeBlocks => "eth_subscribe",
        }
    }
}

/// Releases calls blocked by [`InMemoryNode::hold`].
///
/// Dropping the gate releases them too.
#[derive(Debug)]
pub struct CallGate {
    open: watch::Sender<bool>,
}

impl CallGate {
    /// Let every held call proceed.
    pub fn release(&self) {
        self.open.send_replace(true);
    }
}

#[derive(Clone, Debug)]
struct RecordedLog {
    address: H160,
    topics: Vec<H256>,
    event: RootChangeEvent,
}

#[derive(Default)]
struct NodeInner {
    head: u64,
    values: HashMap<ContractMethod, U256>,
    logs: Vec<RecordedLog>,
    timestamps: HashMap<H256, u64>,
    failures: HashMap<CallKind, u32>,
    gates: HashMap<CallKind, watch::Receiver<bool>>,
    next_holds: HashMap<CallKind, VecDeque<watch::Receiver<bool>>>,
    pending_mints: u64,
    log_queries: Vec<(u64, u64)>,
    read_calls: Vec<ContractMethod>,
    submitted_mints: Vec<(H160, H160)>,
    log_senders: Vec<(EventFilter, mpsc::Sender<RootChangeEvent>)>,
    block_senders: Vec<mpsc::Sender<NewBlock>>,
}

/// In-memory node connection.
pub struct InMemoryNode {
    id: ConnectionId,
    inner: Mutex<NodeInner>,
}

impl InMemoryNode {
    /// Create a node at block 0 with every contract value at 0.
    pub fn new() -> Self {
        Self::with_head(0)
    }

    /// Create a node with the given head block.
    pub fn with_head(head: u64) -> Self {
        Self {
            id: ConnectionId::new(),
            inner: Mutex::new(NodeInner {
                head,
                ..NodeInner::default()
            }),
        }
    }

    /// Current head block.
    pub fn head(&self) -> u64 {
        self.inner.lock().head
    }

    /// Move the head without notifying block listeners.
    pub fn set_head(&self, head: u64) {
        self.inner.lock().head = head;
    }

    /// Set the value a contract getter returns.
    pub fn set_value(&self, method: ContractMethod, value: u64) {
        self.inner.lock().values.insert(method, U256::from(value));
    }

    /// Set a raw `uint256` getter value.
    pub fn set_raw_value(&self, method: ContractMethod, value: U256) {
        self.inner.lock().values.insert(method, value);
    }

    /// Register the timestamp of a block hash.
    pub fn set_block_timestamp(&self, block_hash: H256, timestamp: u64) {
        self.inner.lock().timestamps.insert(block_hash, timestamp);
    }

    /// Add a historical root-change log emitted by `address`.
    pub fn record_root_change(&self, address: H160, event: RootChangeEvent, timestamp: u64) {
        let mut inner = self.inner.lock();
        inner.timestamps.insert(event.block_hash, timestamp);
        inner.logs.push(RecordedLog {
            address,
            topics: vec![keccak256(ROOT_CHANGED_SIGNATURE.as_bytes())],
            event,
        });
    }

    /// Record a root-change log and deliver it to matching live feeds.
    pub fn emit_root_change(&self, address: H160, event: RootChangeEvent, timestamp: u64) {
        self.record_root_change(address, event.clone(), timestamp);
        let topic = keccak256(ROOT_CHANGED_SIGNATURE.as_bytes());

        let mut inner = self.inner.lock();
        inner.log_senders.retain(|(_, tx)| !tx.is_closed());
        for (filter, tx) in &inner.log_senders {
            if filter.matches(&address, &[topic]) {
                let _ = tx.try_send(event.clone());
            }
        }
    }

    /// Mine a block: applies submitted mints and notifies block listeners.
    pub fn mine_block(&self) -> NewBlock {
        let mut inner = self.inner.lock();
        inner.head += 1;

        if inner.pending_mints > 0 {
            let minted = inner.pending_mints;
            inner.pending_mints = 0;
            let total = inner
                .values
                .entry(ContractMethod::TotalSupply)
                .or_insert_with(U256::zero);
            *total = total.saturating_add(U256::from(minted));
        }

        let block = NewBlock {
            number: inner.head,
            hash: Some(keccak256(&inner.head.to_be_bytes())),
        };
        inner.block_senders.retain(|tx| !tx.is_closed());
        for tx in &inner.block_senders {
            let _ = tx.try_send(block);
        }
        block
    }

    /// Fail the next `times` calls of `kind`.
    pub fn fail_next(&self, kind: CallKind, times: u32) {
        *self.inner.lock().failures.entry(kind).or_insert(0) += times;
    }

    /// Block calls of `kind` until the returned gate is released.
    pub fn hold(&self, kind: CallKind) -> CallGate {
        let (open, rx) = watch::channel(false);
        self.inner.lock().gates.insert(kind, rx);
        CallGate { open }
    }

    /// Block only the next call of `kind` until the returned gate is
    /// released. Repeated calls queue gates for the calls after it.
    pub fn hold_next(&self, kind: CallKind) -> CallGate {
        let (open, rx) = watch::channel(false);
        self.inner
            .lock()
            .next_holds
            .entry(kind)
            .or_default()
            .push_back(rx);
        CallGate { open }
    }

    /// Live block feeds.
    pub fn block_listener_count(&self) -> usize {
        self.inner
            .lock()
            .block_senders
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Live log feeds.
    pub fn log_listener_count(&self) -> usize {
        self.inner
            .lock()
            .log_senders
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    /// `(from_block, head)` of every successful log query, in call order.
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.inner.lock().log_queries.clone()
    }

    /// Contract reads started, in call order.
    pub fn read_calls(&self) -> Vec<ContractMethod> {
        self.inner.lock().read_calls.clone()
    }

    /// `(contract, recipient)` of every submitted mint.
    pub fn submitted_mints(&self) -> Vec<(H160, H160)> {
        self.inner.lock().submitted_mints.clone()
    }

    /// Wait at the gate for `kind`, then consume a scripted failure if any.
    async fn enter(&self, kind: CallKind) -> Result<(), SyncError> {
        let gate = {
            let mut inner = self.inner.lock();
            match inner.next_holds.get_mut(&kind).and_then(VecDeque::pop_front) {
                Some(once) => Some(once),
                None => inner.gates.get(&kind).cloned(),
            }
        };
        if let Some(mut gate) = gate {
            debug!(?kind, "[node] Call held");
            // A dropped gate counts as released.
            let _ = gate.wait_for(|open| *open).await;
        }

        let mut inner = self.inner.lock();
        match inner.failures.get_mut(&kind) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(SyncError::remote(kind.rpc_name(), "scripted failure"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for InMemoryNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeConnection for InMemoryNode {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    async fn read_contract_value(
        &self,
        _address: H160,
        method: ContractMethod,
    ) -> Result<U256, SyncError> {
        let value = {
            let mut inner = self.inner.lock();
            inner.read_calls.push(method);
            inner.values.get(&method).copied().unwrap_or_default()
        };
        self.enter(CallKind::Read(method)).await?;
        Ok(value)
    }

    async fn query_logs(
        &self,
        filter: &EventFilter,
        from_block_offset: i64,
    ) -> Result<Vec<RootChangeEvent>, SyncError> {
        self.enter(CallKind::QueryLogs).await?;

        let mut inner = self.inner.lock();
        let head = inner.head;
        let from = EventFilter::start_block(head, from_block_offset);
        inner.log_queries.push((from, head));

        let mut events: Vec<RootChangeEvent> = inner
            .logs
            .iter()
            .filter(|log| filter.matches(&log.address, &log.topics))
            .filter(|log| (from..=head).contains(&log.event.emitted_at.block_number))
            .map(|log| log.event.clone())
            .collect();
        events.sort_by_key(|event| event.emitted_at);
        Ok(events)
    }

    async fn get_block_timestamp(&self, block_hash: H256) -> Result<u64, SyncError> {
        self.enter(CallKind::BlockTimestamp).await?;
        self.inner
            .lock()
            .timestamps
            .get(&block_hash)
            .copied()
            .ok_or_else(|| SyncError::remote("eth_getBlockByHash", format!("unknown block {block_hash:?}")))
    }

    async fn subscribe(&self, filter: &EventFilter) -> Result<LogReceiver, SyncError> {
        self.enter(CallKind::Subscribe).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.inner.lock().log_senders.push((filter.clone(), tx));
        Ok(rx)
    }

    async fn subscribe_blocks(&self) -> Result<BlockReceiver, SyncError> {
        self.enter(CallKind::SubscribeBlocks).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.inner.lock().block_senders.push(tx);
        Ok(rx)
    }

    async fn unsubscribe_all(&self) {
        let mut inner = self.inner.lock();
        inner.log_senders.clear();
        inner.block_senders.clear();
    }

    async fn submit_mint(&self, contract: H160, recipient: H160) -> Result<H256, SyncError> {
        self.enter(CallKind::SubmitMint).await?;
        let mut inner = self.inner.lock();
        inner.submitted_mints.push((contract, recipient));
        inner.pending_mints += 1;

        let mut preimage = recipient.as_bytes().to_vec();
        preimage.extend_from_slice(&(inner.submitted_mints.len() as u64).to_be_bytes());
        Ok(keccak256(&preimage))
    }
}
