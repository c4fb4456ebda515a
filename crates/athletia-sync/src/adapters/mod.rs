//! # Adapters
//!
//! `NodeConnection` implementations.
//!
//! - `json_rpc`: Ethereum-style JSON-RPC over HTTP with polling feeds
//! - `in_memory`: scriptable local node for tests and offline runs

pub mod in_memory;
pub mod json_rpc;

pub use in_memory::{CallGate, CallKind, InMemoryNode};
pub use json_rpc::{JsonRpcNode, MAX_BLOCK_CATCH_UP, MAX_LOG_RANGE};
