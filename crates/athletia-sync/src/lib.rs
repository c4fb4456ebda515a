//! # Athletia Sync
//!
//! Keeps a local view of on-chain reputation state consistent with the
//! chain: historical sync on startup, live listeners afterwards.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Track three values for a dashboard:
//! - minted token count of the issuance contract
//! - max supply of the issuance contract
//! - timestamp of the latest Merkle root update (`RootChanged` log)
//!
//! ## Consistency Rules
//!
//! | Rule | Description |
//! |------|-------------|
//! | Single writer | Only `ReconciliationEngine` mutates `SyncState` |
//! | Monotonic root | `last_root_update` never moves backwards |
//! | Isolated failures | One failed fetch never blanks the other fields |
//! | Session guard | A detached session's late callbacks change nothing |
//!
//! ## Module Structure
//!
//! ```text
//! athletia-sync/
//! ├── domain/          # SyncState, RootUpdate, EventFilter, errors, invariants
//! ├── algorithms/      # Range resolver, merge rules, deadlines, ABI helpers
//! ├── ports/           # ReconciliationApi (inbound) + NodeConnection (outbound)
//! ├── application/     # ReconciliationEngine, ConnectionSession, StateStore
//! ├── adapters/        # JsonRpcNode, InMemoryNode
//! └── config.rs        # SyncConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports
pub use adapters::{CallGate, CallKind, InMemoryNode, JsonRpcNode};
pub use algorithms::{bounded_call, select_latest, EventRangeResolver};
pub use application::{ConnectionSession, ReconciliationEngine, StateStore, WriteScope};
pub use config::{SyncConfig, WatchedContracts};
pub use domain::{
    parse_address, BootstrapReport, ConnectionId, ContractMethod, EventFilter, FieldFailure,
    Freshness, LogPosition, NewBlock, RootChangeEvent, RootUpdate, SessionId, SessionState,
    SyncError, SyncField, SyncSignal, SyncState, Tracked, DEFAULT_CALL_TIMEOUT_MS,
    DEFAULT_NARROW_LOOKBACK, DEFAULT_WIDE_LOOKBACK,
};
pub use ports::{BlockReceiver, LogReceiver, NodeConnection, ReconciliationApi};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
