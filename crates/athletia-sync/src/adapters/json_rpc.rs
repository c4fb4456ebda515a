//! JSON-RPC Node Adapter
//!
//! `NodeConnection` over an Ethereum-style JSON-RPC HTTP endpoint.
//!
//! Live feeds are polling subscriptions: one task per feed asks for the
//! head every `poll_interval` and forwards what is new. `unsubscribe_all`
//! aborts every poller of this connection.

use crate::algorithms::{
    decode_uint_word, encode_read_call, encode_safe_mint, parse_hex_u64, to_hex_quantity,
};
use crate::domain::{
    ConnectionId, ContractMethod, EventFilter, LogPosition, NewBlock, RootChangeEvent, SyncError,
};
use crate::ports::outbound::{BlockReceiver, LogReceiver, NodeConnection, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use parking_lot::Mutex;
use primitive_types::{H160, H256, U256};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Blocks announced per poll at most; older ones are skipped.
pub const MAX_BLOCK_CATCH_UP: u64 = 32;

/// Widest `eth_getLogs` range a live poll asks for in one request.
pub const MAX_LOG_RANGE: u64 = 2_000;

/// JSON-RPC request structure.
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// JSON-RPC response structure.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure.
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Log object as returned by `eth_getLogs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: H160,
    #[serde(default)]
    topics: Vec<H256>,
    block_hash: Option<H256>,
    block_number: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

/// The part of a block object we read.
#[derive(Debug, Deserialize)]
struct RpcBlock {
    timestamp: String,
}

/// HTTP transport shared by the connection and its pollers.
#[derive(Clone)]
struct RpcTransport {
    http_client: reqwest::Client,
    rpc_url: Arc<str>,
    request_id: Arc<AtomicU64>,
}

impl RpcTransport {
    fn new(rpc_url: &str, timeout: Duration) -> Self {
        // reqwest::Client::new() is infallible; fall back to it.
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            rpc_url: Arc::from(rpc_url),
            request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Make a JSON-RPC call whose result may be `null`.
    async fn call_optional<R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<Option<R>, SyncError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let response = self
            .http_client
            .post(self.rpc_url.as_ref())
            .json(&request)
            .send()
            .await
            .map_err(|e| SyncError::remote(method, e))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| SyncError::remote(method, format!("invalid response: {e}")))?;

        if let Some(error) = rpc_response.error {
            return Err(SyncError::remote(
                method,
                format!("RPC error {}: {}", error.code, error.message),
            ));
        }
        Ok(rpc_response.result)
    }

    /// Make a JSON-RPC call.
    async fn call<R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<R, SyncError> {
        self.call_optional(method, params)
            .await?
            .ok_or_else(|| SyncError::remote(method, "response missing result"))
    }

    /// eth_blockNumber - current head.
    async fn block_number(&self) -> Result<u64, SyncError> {
        let result: String = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&result)
    }

    /// eth_getLogs over an absolute block range.
    async fn logs(
        &self,
        filter: &EventFilter,
        range: RangeInclusive<u64>,
    ) -> Result<Vec<RootChangeEvent>, SyncError> {
        let logs: Vec<RpcLog> = self
            .call("eth_getLogs", log_filter_params(filter, range))
            .await?;
        Ok(collect_events(filter, logs))
    }
}

/// `NodeConnection` backed by a JSON-RPC endpoint.
pub struct JsonRpcNode {
    id: ConnectionId,
    transport: RpcTransport,
    poll_interval: Duration,
    /// Account used for `eth_sendTransaction`.
    sender: Option<H160>,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl JsonRpcNode {
    /// Connect to `rpc_url`. No request is made until the first call.
    pub fn new(rpc_url: &str, call_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            id: ConnectionId::new(),
            transport: RpcTransport::new(rpc_url, call_timeout),
            poll_interval,
            sender: None,
            pollers: Mutex::new(Vec::new()),
        }
    }

    /// Set the account that signs mint transactions (node-managed key).
    pub fn with_sender(mut self, sender: H160) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Endpoint URL.
    pub fn rpc_url(&self) -> &str {
        &self.transport.rpc_url
    }

    /// Number of running pollers.
    pub fn poller_count(&self) -> usize {
        self.pollers
            .lock()
            .iter()
            .filter(|poller| !poller.is_finished())
            .count()
    }

    fn track(&self, poller: JoinHandle<()>) {
        let mut pollers = self.pollers.lock();
        pollers.retain(|p| !p.is_finished());
        pollers.push(poller);
    }
}

impl Drop for JsonRpcNode {
    fn drop(&mut self) {
        for poller in self.pollers.get_mut().drain(..) {
            poller.abort();
        }
    }
}

#[async_trait]
impl NodeConnection for JsonRpcNode {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    async fn read_contract_value(
        &self,
        address: H160,
        method: ContractMethod,
    ) -> Result<U256, SyncError> {
        let params = json!([
            { "to": address, "data": encode_read_call(method) },
            "latest"
        ]);
        let result: String = self.transport.call("eth_call", params).await?;
        decode_uint_word(&result)
    }

    async fn query_logs(
        &self,
        filter: &EventFilter,
        from_block_offset: i64,
    ) -> Result<Vec<RootChangeEvent>, SyncError> {
        let head = self.transport.block_number().await?;
        let from = EventFilter::start_block(head, from_block_offset);
        debug!(from, head, "[rpc] eth_getLogs");
        self.transport.logs(filter, from..=head).await
    }

    async fn get_block_timestamp(&self, block_hash: H256) -> Result<u64, SyncError> {
        let block: Option<RpcBlock> = self
            .transport
            .call_optional("eth_getBlockByHash", json!([block_hash, false]))
            .await?;
        let block = block.ok_or_else(|| {
            SyncError::remote("eth_getBlockByHash", format!("unknown block {block_hash:?}"))
        })?;
        parse_hex_u64(&block.timestamp)
    }

    async fn subscribe(&self, filter: &EventFilter) -> Result<LogReceiver, SyncError> {
        let head = self.transport.block_number().await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let poller = tokio::spawn(poll_logs(
            self.transport.clone(),
            filter.clone(),
            head + 1,
            self.poll_interval,
            tx,
        ));
        self.track(poller);
        Ok(rx)
    }

    async fn subscribe_blocks(&self) -> Result<BlockReceiver, SyncError> {
        let head = self.transport.block_number().await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let poller = tokio::spawn(poll_blocks(
            self.transport.clone(),
            head,
            self.poll_interval,
            tx,
        ));
        self.track(poller);
        Ok(rx)
    }

    async fn unsubscribe_all(&self) {
        let pollers = std::mem::take(&mut *self.pollers.lock());
        debug!(count = pollers.len(), "[rpc] Stopping pollers");
        for poller in pollers {
            poller.abort();
        }
    }

    async fn submit_mint(&self, contract: H160, recipient: H160) -> Result<H256, SyncError> {
        let sender = self.sender.ok_or_else(|| {
            SyncError::Config("no sender account configured for minting".to_string())
        })?;
        let params = json!([{
            "from": sender,
            "to": contract,
            "data": encode_safe_mint(recipient),
        }]);
        self.transport.call("eth_sendTransaction", params).await
    }
}

async fn poll_logs(
    transport: RpcTransport,
    filter: EventFilter,
    mut next_block: u64,
    poll_interval: Duration,
    tx: mpsc::Sender<RootChangeEvent>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            return;
        }

        let head = match transport.block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "[rpc] Log poll failed");
                continue;
            }
        };
        if head < next_block {
            continue;
        }

        // Progress is kept per chunk, so a backlog drains over later ticks.
        for range in log_chunks(next_block, head) {
            let (from, to) = (*range.start(), *range.end());
            match transport.logs(&filter, range).await {
                Ok(events) => {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    next_block = to.saturating_add(1);
                }
                Err(e) => {
                    warn!(from, to, head, error = %e, "[rpc] Log poll failed");
                    break;
                }
            }
        }
    }
}

async fn poll_blocks(
    transport: RpcTransport,
    mut last_seen: u64,
    poll_interval: Duration,
    tx: mpsc::Sender<NewBlock>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            return;
        }

        let head = match transport.block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "[rpc] Block poll failed");
                continue;
            }
        };

        for number in catch_up_range(last_seen, head) {
            if tx.send(NewBlock { number, hash: None }).await.is_err() {
                return;
            }
        }
        last_seen = last_seen.max(head);
    }
}

/// Blocks to announce after `last_seen` up to `head`, capped.
fn catch_up_range(last_seen: u64, head: u64) -> RangeInclusive<u64> {
    let start = (last_seen + 1).max(head.saturating_sub(MAX_BLOCK_CATCH_UP - 1));
    start..=head
}

/// `next_block..=head` split into ranges of at most `MAX_LOG_RANGE` blocks.
fn log_chunks(next_block: u64, head: u64) -> Vec<RangeInclusive<u64>> {
    let mut chunks = Vec::new();
    let mut from = next_block;
    while from <= head {
        let to = head.min(from.saturating_add(MAX_LOG_RANGE - 1));
        chunks.push(from..=to);
        if to == u64::MAX {
            break;
        }
        from = to + 1;
    }
    chunks
}

fn log_filter_params(filter: &EventFilter, range: RangeInclusive<u64>) -> Value {
    json!([{
        "address": filter.contract_address,
        "topics": [filter.topic],
        "fromBlock": to_hex_quantity(*range.start()),
        "toBlock": to_hex_quantity(*range.end()),
    }])
}

/// Matching, mined, non-removed logs as events in ascending order.
fn collect_events(filter: &EventFilter, logs: Vec<RpcLog>) -> Vec<RootChangeEvent> {
    let mut events: Vec<RootChangeEvent> = logs
        .into_iter()
        .filter(|log| !log.removed && filter.matches(&log.address, &log.topics))
        .filter_map(to_event)
        .collect();
    events.sort_by_key(|event| event.emitted_at);
    events
}

/// Pending logs (no block yet) are skipped.
fn to_event(log: RpcLog) -> Option<RootChangeEvent> {
    let block_hash = log.block_hash?;
    let block_number = parse_hex_u64(log.block_number.as_deref()?).ok()?;
    let log_index = log
        .log_index
        .as_deref()
        .and_then(|index| parse_hex_u64(index).ok())
        .unwrap_or(0);
    Some(RootChangeEvent::new(
        block_hash,
        LogPosition::new(block_number, log_index),
    ))
}
