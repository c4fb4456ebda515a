//! # Inbound Ports
//!
//! API the presentation layer uses to drive reconciliation.

use super::outbound::NodeConnection;
use crate::application::ConnectionSession;
use crate::domain::{BootstrapReport, SyncError, SyncState};
use async_trait::async_trait;
use primitive_types::{H160, H256};
use std::sync::Arc;

/// Reconciliation API - inbound port.
#[async_trait]
pub trait ReconciliationApi: Send + Sync {
    /// One-shot historical sync of all three fields.
    ///
    /// Each field is fetched independently; failures are listed in the
    /// report and never blank the other fields.
    async fn bootstrap(&self, node: &dyn NodeConnection) -> BootstrapReport;

    /// Manual refresh after a recoverable failure. Same rules as bootstrap.
    async fn refresh(&self, node: &dyn NodeConnection) -> BootstrapReport;

    /// Register the live listeners for a connection.
    ///
    /// Re-attaching with a different connection detaches the prior session.
    async fn attach(
        &self,
        node: Arc<dyn NodeConnection>,
    ) -> Result<Arc<ConnectionSession>, SyncError>;

    /// Cancel a session's listeners. Idempotent.
    async fn detach(&self, session: &ConnectionSession);

    /// Submit a mint. Its effect is observed only through live listeners.
    async fn trigger_mint(
        &self,
        node: &dyn NodeConnection,
        recipient: H160,
    ) -> Result<H256, SyncError>;

    /// Synchronous snapshot of the reconciled view.
    fn get_state(&self) -> SyncState;
}
