//! # Outbound Ports
//!
//! The node connection the engine depends on.

use crate::domain::{
    ConnectionId, ContractMethod, EventFilter, NewBlock, RootChangeEvent, SyncError,
};
use async_trait::async_trait;
use primitive_types::{H160, H256, U256};
use tokio::sync::mpsc;

/// Buffered notifications per live subscription.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// Receiving end of a live root-change subscription.
pub type LogReceiver = mpsc::Receiver<RootChangeEvent>;

/// Receiving end of a live new-block subscription.
pub type BlockReceiver = mpsc::Receiver<NewBlock>;

/// Connection to a blockchain RPC endpoint - outbound port.
///
/// Shared read-only infrastructure: owns no application state.
/// Every failure surfaces as a typed `SyncError`.
#[async_trait]
pub trait NodeConnection: Send + Sync {
    /// Identity of this connection object.
    fn connection_id(&self) -> ConnectionId;

    /// Call a read-only contract method.
    async fn read_contract_value(
        &self,
        address: H160,
        method: ContractMethod,
    ) -> Result<U256, SyncError>;

    /// Logs matching `filter` from `head + from_block_offset` to the head,
    /// in ascending chain order.
    async fn query_logs(
        &self,
        filter: &EventFilter,
        from_block_offset: i64,
    ) -> Result<Vec<RootChangeEvent>, SyncError>;

    /// Timestamp (seconds since epoch) of the block with this hash.
    async fn get_block_timestamp(&self, block_hash: H256) -> Result<u64, SyncError>;

    /// Live feed of logs matching `filter`.
    ///
    /// The receiver closes when `unsubscribe_all` runs.
    async fn subscribe(&self, filter: &EventFilter) -> Result<LogReceiver, SyncError>;

    /// Live feed of new block headers.
    async fn subscribe_blocks(&self) -> Result<BlockReceiver, SyncError>;

    /// Cancel every live feed of this connection.
    async fn unsubscribe_all(&self);

    /// Submit `safeMint(recipient)` to the issuance contract.
    ///
    /// Returns the transaction hash without waiting for confirmation.
    async fn submit_mint(&self, contract: H160, recipient: H160) -> Result<H256, SyncError>;
}
