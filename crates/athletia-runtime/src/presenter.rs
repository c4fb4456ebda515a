//! Log-based presentation of the reconciled view.
//!
//! Renders each published snapshot as one line and surfaces recoverable
//! failures as warnings with a retry hint.

use athletia_sync::{Freshness, RootUpdate, SyncSignal, SyncState, Tracked};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

/// Shown when no root update exists in the searched history.
pub const NEVER_UPDATED: &str = "not updated since last refresh";

/// `"{minted}/{max} minted so far"`, with `?` for values never fetched.
pub fn format_supply(state: &SyncState) -> String {
    format!(
        "{}/{} minted so far{}",
        count(&state.minted_count),
        count(&state.max_supply),
        stale_marker(&[state.minted_count.freshness, state.max_supply.freshness]),
    )
}

/// Human-readable time of the latest root update.
pub fn format_last_update(update: &Tracked<RootUpdate>) -> String {
    let text = match update.value {
        RootUpdate::Never if !update.is_known() => "unknown".to_string(),
        RootUpdate::Never => NEVER_UPDATED.to_string(),
        RootUpdate::At(ts) => i64::try_from(ts)
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| format!("block time {ts}")),
    };
    format!("{text}{}", stale_marker(&[update.freshness]))
}

/// One status line for a snapshot.
pub fn render(state: &SyncState) -> String {
    format!(
        "{} | last root update: {}",
        format_supply(state),
        format_last_update(&state.last_root_update)
    )
}

fn count(field: &Tracked<u64>) -> String {
    if field.is_known() {
        field.value.to_string()
    } else {
        "?".to_string()
    }
}

fn stale_marker(freshness: &[Freshness]) -> &'static str {
    if freshness.contains(&Freshness::Stale) {
        " (stale)"
    } else {
        ""
    }
}

/// Log every snapshot and failure signal until `shutdown` flips.
pub async fn run_presenter<S>(
    mut snapshots: S,
    mut signals: broadcast::Receiver<SyncSignal>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Stream<Item = SyncState> + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            snapshot = snapshots.next() => match snapshot {
                Some(state) => info!(revision = state.revision, "[ui] {}", render(&state)),
                None => break,
            },
            signal = signals.recv() => match signal {
                Ok(signal) => warn!(
                    field = %signal.field,
                    error = %signal.error,
                    recoverable = signal.error.is_recoverable(),
                    "[ui] Fetch failed; showing last known value, refresh to retry"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "[ui] Missed failure signals");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
