//! # Domain Invariants
//!
//! Rules the reconciled view must satisfy.

use super::entities::SyncState;
use super::errors::SyncError;
use super::value_objects::{RootUpdate, SessionState};

/// Narrow lookback window for the latest root-change search.
pub const DEFAULT_NARROW_LOOKBACK: u64 = 1_000;

/// Wide fallback lookback window.
pub const DEFAULT_WIDE_LOOKBACK: u64 = 100_000;

/// Deadline applied to every remote call.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Buffered recoverable-failure signals per subscriber.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 64;

/// Invariant: `minted_count <= max_supply` once both are known.
pub fn invariant_supply_bound(state: &SyncState) -> Result<(), SyncError> {
    if !state.supply_known() {
        return Ok(());
    }
    let minted = state.minted_count.value;
    let max_supply = state.max_supply.value;
    if minted > max_supply {
        return Err(SyncError::SupplyExceeded { minted, max_supply });
    }
    Ok(())
}

/// Invariant: the last root update never regresses.
pub fn invariant_root_monotonic(previous: RootUpdate, next: RootUpdate) -> bool {
    next >= previous
}

/// Invariant: session lifecycle only moves forward.
pub fn invariant_session_transition(
    from: SessionState,
    to: SessionState,
) -> Result<(), SyncError> {
    if !from.can_transition_to(to) {
        return Err(SyncError::InvalidSessionTransition { from, to });
    }
    Ok(())
}

/// Invariant: lookback windows are non-empty and strictly widening.
pub fn invariant_lookback_windows(windows: &[u64]) -> Result<(), SyncError> {
    if windows.is_empty() {
        return Err(SyncError::Config(
            "at least one lookback window is required".to_string(),
        ));
    }
    if windows[0] == 0 {
        return Err(SyncError::Config(
            "lookback windows must be non-zero".to_string(),
        ));
    }
    if windows.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(SyncError::Config(format!(
            "lookback windows must strictly widen, got {windows:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Freshness, Tracked};

    fn known(value: u64) -> Tracked<u64> {
        Tracked {
            value,
            freshness: Freshness::Fresh,
        }
    }

    #[test]
    fn test_supply_bound_unknown_passes() {
        let mut state = SyncState::default();
        state.minted_count = known(5);
        assert!(invariant_supply_bound(&state).is_ok());
    }

    #[test]
    fn test_supply_bound_pass() {
        let mut state = SyncState::default();
        state.minted_count = known(5);
        state.max_supply = known(5);
        assert!(invariant_supply_bound(&state).is_ok());
    }

    #[test]
    fn test_supply_bound_fail() {
        let mut state = SyncState::default();
        state.minted_count = known(6);
        state.max_supply = known(5);
        assert!(matches!(
            invariant_supply_bound(&state),
            Err(SyncError::SupplyExceeded { minted: 6, max_supply: 5 })
        ));
    }

    #[test]
    fn test_root_monotonic() {
        assert!(invariant_root_monotonic(RootUpdate::Never, RootUpdate::At(1)));
        assert!(invariant_root_monotonic(RootUpdate::At(1), RootUpdate::At(1)));
        assert!(!invariant_root_monotonic(RootUpdate::At(2), RootUpdate::At(1)));
        assert!(!invariant_root_monotonic(RootUpdate::At(2), RootUpdate::Never));
    }

    #[test]
    fn test_session_transition_rejects_reattach() {
        let result = invariant_session_transition(SessionState::Detached, SessionState::Attached);
        assert!(matches!(
            result,
            Err(SyncError::InvalidSessionTransition { .. })
        ));
    }

    #[test]
    fn test_lookback_windows() {
        assert!(invariant_lookback_windows(&[1_000, 100_000]).is_ok());
        assert!(invariant_lookback_windows(&[500]).is_ok());
        assert!(invariant_lookback_windows(&[]).is_err());
        assert!(invariant_lookback_windows(&[0, 10]).is_err());
        assert!(invariant_lookback_windows(&[100, 100]).is_err());
        assert!(invariant_lookback_windows(&[100, 50]).is_err());
    }
}
