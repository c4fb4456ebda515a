//! # Domain Value Objects
//!
//! Immutable value types for state reconciliation.

use super::errors::SyncError;
use primitive_types::{H160, H256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use uuid::Uuid;

/// Event emitted by the Merkle tree contract whenever its root is replaced.
pub const ROOT_CHANGED_SIGNATURE: &str = "RootChanged(string,string)";

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

/// Parse a `0x`-prefixed (or bare) 20-byte hex address.
pub fn parse_address(input: &str) -> Result<H160, SyncError> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits)
        .map_err(|e| SyncError::Config(format!("invalid address {trimmed:?}: {e}")))?;
    if bytes.len() != 20 {
        return Err(SyncError::Config(format!(
            "invalid address {trimmed:?}: expected 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(H160::from_slice(&bytes))
}

/// Identity of one node connection object.
///
/// A new connection (account or network switch) always gets a new identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one live-subscription session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh session identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only methods of the issuance contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractMethod {
    /// Number of tokens minted so far.
    TotalSupply,
    /// Cap on the number of tokens.
    MaxSupply,
}

impl ContractMethod {
    /// Solidity signature used to derive the call selector.
    pub fn signature(&self) -> &'static str {
        match self {
            ContractMethod::TotalSupply => "totalSupply()",
            ContractMethod::MaxSupply => "maxSupply()",
        }
    }
}

/// Position of a log in chain order.
///
/// Field order makes the derived `Ord` the natural log order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    /// Block containing the log.
    pub block_number: u64,
    /// Index of the log within its block.
    pub log_index: u64,
}

impl LogPosition {
    /// Create a log position.
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

/// Descriptor of an on-chain log query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Contract emitting the event.
    pub contract_address: H160,
    /// First topic (event signature hash).
    pub topic: H256,
    /// Start of the range relative to the chain head. Negative = lookback.
    pub from_block_offset: i64,
}

impl EventFilter {
    /// Filter for `RootChanged(string,string)` on the given contract.
    pub fn root_changed(contract_address: H160) -> Self {
        Self {
            contract_address,
            topic: keccak256(ROOT_CHANGED_SIGNATURE.as_bytes()),
            from_block_offset: 0,
        }
    }

    /// Same filter looking back `blocks` blocks from the head.
    pub fn with_lookback(&self, blocks: u64) -> Self {
        let offset = i64::try_from(blocks).map(|b| -b).unwrap_or(i64::MIN);
        Self {
            from_block_offset: offset,
            ..self.clone()
        }
    }

    /// First block of the range for a given head and offset.
    ///
    /// Non-negative offsets never reach past the head.
    pub fn start_block(head: u64, from_block_offset: i64) -> u64 {
        if from_block_offset < 0 {
            head.saturating_sub(from_block_offset.unsigned_abs())
        } else {
            head
        }
    }

    /// Whether a log with this address and topics matches the filter.
    pub fn matches(&self, address: &H160, topics: &[H256]) -> bool {
        *address == self.contract_address && topics.first() == Some(&self.topic)
    }
}

/// A root-change log observed on chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootChangeEvent {
    /// Block that contains the log. Resolved to a timestamp separately.
    pub block_hash: H256,
    /// Logical order of the log.
    pub emitted_at: LogPosition,
}

impl RootChangeEvent {
    /// Create an event.
    pub fn new(block_hash: H256, emitted_at: LogPosition) -> Self {
        Self {
            block_hash,
            emitted_at,
        }
    }
}

/// Timestamp of the latest Merkle root update.
///
/// `Never` sorts below every timestamp, so `max` is the merge law.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RootUpdate {
    /// No update observed in the searched history.
    #[default]
    Never,
    /// Block timestamp in seconds since the epoch.
    At(u64),
}

impl RootUpdate {
    /// Monotonic merge: never regresses.
    pub fn merge(self, other: RootUpdate) -> RootUpdate {
        self.max(other)
    }

    /// Timestamp, if any update was observed.
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            RootUpdate::Never => None,
            RootUpdate::At(ts) => Some(*ts),
        }
    }

    /// Check for the "never" sentinel.
    pub fn is_never(&self) -> bool {
        matches!(self, RootUpdate::Never)
    }
}

/// How current a tracked field is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    /// No fetch completed yet.
    #[default]
    Unfetched,
    /// The latest fetch succeeded.
    Fresh,
    /// An earlier fetch succeeded, the latest one failed.
    Stale,
    /// Every fetch so far failed.
    Unavailable,
}

impl Freshness {
    /// State after a failed fetch.
    pub fn after_failure(self) -> Freshness {
        match self {
            Freshness::Fresh | Freshness::Stale => Freshness::Stale,
            Freshness::Unfetched | Freshness::Unavailable => Freshness::Unavailable,
        }
    }

    /// Whether the value came from at least one successful fetch.
    pub fn is_known(&self) -> bool {
        matches!(self, Freshness::Fresh | Freshness::Stale)
    }
}

/// Fields of the reconciled view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncField {
    /// Minted token count.
    MintedCount,
    /// Maximum token supply.
    MaxSupply,
    /// Latest Merkle root update.
    LastRootUpdate,
}

impl fmt::Display for SyncField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncField::MintedCount => "minted_count",
            SyncField::MaxSupply => "max_supply",
            SyncField::LastRootUpdate => "last_root_update",
        };
        f.write_str(name)
    }
}

/// New block header notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlock {
    /// Block number.
    pub number: u64,
    /// Block hash, when the transport provides it.
    pub hash: Option<H256>,
}

/// Session state machine: `Unattached -> Attached -> Detached`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, listeners not registered yet.
    #[default]
    Unattached,
    /// Listeners registered and live.
    Attached,
    /// Listeners cancelled. Terminal.
    Detached,
}

impl SessionState {
    /// Check if transition is valid.
    ///
    /// An unattached session may be abandoned straight to `Detached`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Unattached, Self::Attached)
                | (Self::Unattached, Self::Detached)
                | (Self::Attached, Self::Detached)
        )
    }

    /// Check if terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Detached)
    }
}
