//! # Merge Policies
//!
//! How remote observations are folded into the reconciled view.
//!
//! - Counters: most recent completed read wins (overwrite).
//! - Root update: monotonic `max`, so a late historical lookup can never
//!   roll back a newer live event.

use crate::domain::{invariant_root_monotonic, Freshness, RootUpdate, Tracked};

/// Overwrite a counter with a fresh read. Returns `true` if anything changed.
pub fn overwrite_count(field: &mut Tracked<u64>, value: u64) -> bool {
    let changed = field.value != value || field.freshness != Freshness::Fresh;
    field.value = value;
    field.freshness = Freshness::Fresh;
    changed
}

/// Merge a resolved root update. Returns `true` if anything changed.
pub fn merge_root_update(field: &mut Tracked<RootUpdate>, incoming: RootUpdate) -> bool {
    let merged = field.value.merge(incoming);
    debug_assert!(invariant_root_monotonic(field.value, merged));
    let changed = merged != field.value || field.freshness != Freshness::Fresh;
    field.value = merged;
    field.freshness = Freshness::Fresh;
    changed
}

/// Record a failed fetch. Returns `true` if the freshness marker changed.
pub fn mark_failed<T>(field: &mut Tracked<T>) -> bool {
    let before = field.freshness;
    field.mark_failed();
    before != field.freshness
}
