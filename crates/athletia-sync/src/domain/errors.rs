//! # Domain Errors
//!
//! Error types for state reconciliation.
//!
//! A query that legitimately finds nothing is NOT an error here: the range
//! resolver returns `None` and the engine maps it to `RootUpdate::Never`.

use super::value_objects::SessionState;
use thiserror::Error;

/// Reconciliation error types.
///
/// `Clone` so failures can be broadcast to every signal subscriber.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    /// A remote call to the node failed (network, node or contract error).
    #[error("Remote call {call} failed: {reason}")]
    RemoteCall {
        /// Name of the remote call
        call: &'static str,
        /// Failure description
        reason: String,
    },

    /// A remote call did not complete within its deadline.
    #[error("Remote call {call} timed out after {timeout_ms}ms")]
    Timeout {
        /// Name of the remote call
        call: &'static str,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Required configuration is missing or malformed. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A node response could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Session lifecycle violation.
    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidSessionTransition {
        /// Current state
        from: SessionState,
        /// Requested state
        to: SessionState,
    },

    /// The node closed a live subscription.
    #[error("Subscription closed by node")]
    SubscriptionClosed,

    /// Minted count observed above max supply.
    ///
    /// Diagnostic only: built by `invariant_supply_bound` and logged by the
    /// state store. Never returned from an operation nor broadcast as a
    /// signal; node data is kept as read.
    #[error("Minted count {minted} exceeds max supply {max_supply}")]
    SupplyExceeded {
        /// Observed minted count
        minted: u64,
        /// Observed max supply
        max_supply: u64,
    },
}

impl SyncError {
    /// Build a remote-call failure from any displayable cause.
    pub fn remote(call: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::RemoteCall {
            call,
            reason: reason.to_string(),
        }
    }

    /// Whether the caller can recover with a manual refresh.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Config(_) | Self::InvalidSessionTransition { .. }
        )
    }
}
