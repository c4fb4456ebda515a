//! # Domain Entities
//!
//! The reconciled view and the reports built around it.

use super::errors::SyncError;
use super::value_objects::{Freshness, RootUpdate, SessionId, SyncField};
use serde::{Deserialize, Serialize};

/// A value together with its freshness marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracked<T> {
    /// Last known value (or the default before the first fetch).
    pub value: T,
    /// How current `value` is.
    pub freshness: Freshness,
}

impl<T> Tracked<T> {
    /// A value that has not been fetched yet.
    pub fn unfetched(value: T) -> Self {
        Self {
            value,
            freshness: Freshness::Unfetched,
        }
    }

    /// Whether at least one fetch succeeded.
    pub fn is_known(&self) -> bool {
        self.freshness.is_known()
    }

    /// Record a failed fetch, keeping the last known value.
    pub fn mark_failed(&mut self) {
        self.freshness = self.freshness.after_failure();
    }
}

/// The reconciled view of on-chain state.
///
/// Owned by exactly one writer (the reconciliation engine).
/// Readers only ever see cloned snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Tokens minted by the issuance contract.
    pub minted_count: Tracked<u64>,
    /// Maximum supply of the issuance contract.
    pub max_supply: Tracked<u64>,
    /// Timestamp of the latest Merkle root update.
    pub last_root_update: Tracked<RootUpdate>,
    /// Incremented on every applied mutation.
    pub revision: u64,
}

impl SyncState {
    /// Whether both supply figures come from successful reads.
    pub fn supply_known(&self) -> bool {
        self.minted_count.is_known() && self.max_supply.is_known()
    }

    /// Tokens still mintable, once both figures are known.
    pub fn remaining_supply(&self) -> Option<u64> {
        if !self.supply_known() {
            return None;
        }
        Some(self.max_supply.value.saturating_sub(self.minted_count.value))
    }

    /// Freshness of a field.
    pub fn freshness(&self, field: SyncField) -> Freshness {
        match field {
            SyncField::MintedCount => self.minted_count.freshness,
            SyncField::MaxSupply => self.max_supply.freshness,
            SyncField::LastRootUpdate => self.last_root_update.freshness,
        }
    }
}

/// A recoverable failure on a single field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncSignal {
    /// Field whose fetch failed.
    pub field: SyncField,
    /// Cause of the failure.
    pub error: SyncError,
    /// Live session that observed it (`None` for bootstrap or refresh).
    pub session: Option<SessionId>,
}

/// Failure of one field during bootstrap or refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldFailure {
    /// Field that could not be fetched.
    pub field: SyncField,
    /// Cause.
    pub error: SyncError,
}

/// Result of a historical sync.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Snapshot after all three fetches settled.
    pub state: SyncState,
    /// One entry per field that failed. Other fields still populated.
    pub failures: Vec<FieldFailure>,
}

impl BootstrapReport {
    /// True when every field was fetched.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failure recorded for a field, if any.
    pub fn failure(&self, field: SyncField) -> Option<&SyncError> {
        self.failures
            .iter()
            .find(|f| f.field == field)
            .map(|f| &f.error)
    }
}
