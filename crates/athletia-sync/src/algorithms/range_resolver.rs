//! # Event Range Resolver
//!
//! Finds the most recent log matching a filter by widening the lookback
//! window tier by tier. Most lookups resolve in the cheap narrow window;
//! the wide fallback is rare and accepted to be slower.
//!
//! An empty result in every window is `Ok(None)`, not an error.

use super::deadline::bounded_call;
use crate::config::SyncConfig;
use crate::domain::{EventFilter, RootChangeEvent, SyncError};
use crate::ports::NodeConnection;
use std::time::Duration;
use tracing::debug;

/// Widening lookback search for the latest matching event.
#[derive(Clone, Debug)]
pub struct EventRangeResolver {
    /// Lookback distances, narrowest first.
    windows: Vec<u64>,
    /// Deadline for each log query.
    call_timeout: Duration,
}

impl EventRangeResolver {
    /// Create a resolver with explicit windows.
    pub fn new(windows: Vec<u64>, call_timeout: Duration) -> Self {
        Self {
            windows,
            call_timeout,
        }
    }

    /// Create a resolver from configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.lookback_windows.clone(), config.call_timeout())
    }

    /// Configured lookback windows.
    pub fn windows(&self) -> &[u64] {
        &self.windows
    }

    /// Latest event matching `filter`, or `None` if no window contains one.
    ///
    /// A failed query is returned as-is: widening is the only retry.
    pub async fn find_latest(
        &self,
        node: &dyn NodeConnection,
        filter: &EventFilter,
    ) -> Result<Option<RootChangeEvent>, SyncError> {
        for (tier, window) in self.windows.iter().enumerate() {
            let scoped = filter.with_lookback(*window);
            let events = bounded_call(
                "query_logs",
                self.call_timeout,
                node.query_logs(&scoped, scoped.from_block_offset),
            )
            .await?;

            if let Some(latest) = select_latest(&events) {
                debug!(
                    tier,
                    window,
                    matches = events.len(),
                    block = latest.emitted_at.block_number,
                    "[sync] Latest root-change event found"
                );
                return Ok(Some(latest.clone()));
            }

            debug!(tier, window, "[sync] No root-change events in lookback window");
        }

        Ok(None)
    }
}

/// Event with the highest log order.
///
/// For ascending query results this is the last element.
pub fn select_latest(events: &[RootChangeEvent]) -> Option<&RootChangeEvent> {
    events.iter().max_by_key(|event| event.emitted_at)
}
