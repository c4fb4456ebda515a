//! # State Store
//!
//! Single-writer store for the reconciled view. Every applied mutation
//! publishes a snapshot on a `watch` channel; recoverable failures go out
//! on a `broadcast` channel.
//!
//! Session-scoped writes are checked against the active session under the
//! same lock that guards the state, so once a session is deactivated no
//! late callback of that session can mutate anything.

use crate::algorithms::{mark_failed, merge_root_update, overwrite_count};
use crate::domain::{
    invariant_supply_bound, RootUpdate, SessionId, SyncError, SyncField, SyncSignal, SyncState,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// Who is writing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteScope {
    /// Bootstrap or manual refresh. Always applied.
    Refresh,
    /// A live listener. Applied only while its session is active.
    Session(SessionId),
}

impl WriteScope {
    fn session(&self) -> Option<SessionId> {
        match self {
            WriteScope::Refresh => None,
            WriteScope::Session(id) => Some(*id),
        }
    }
}

struct StoreInner {
    state: SyncState,
    active_session: Option<SessionId>,
}

/// Reconciled-state store.
pub struct StateStore {
    inner: Mutex<StoreInner>,
    snapshots: watch::Sender<SyncState>,
    signals: broadcast::Sender<SyncSignal>,
}

impl StateStore {
    /// Create an empty store.
    pub fn new(signal_capacity: usize) -> Self {
        let (snapshots, _) = watch::channel(SyncState::default());
        let (signals, _) = broadcast::channel(signal_capacity.max(1));
        Self {
            inner: Mutex::new(StoreInner {
                state: SyncState::default(),
                active_session: None,
            }),
            snapshots,
            signals,
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SyncState {
        self.inner.lock().state.clone()
    }

    /// Receiver of published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.snapshots.subscribe()
    }

    /// Receiver of recoverable-failure signals.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<SyncSignal> {
        self.signals.subscribe()
    }

    /// Session currently allowed to write.
    pub fn active_session(&self) -> Option<SessionId> {
        self.inner.lock().active_session
    }

    /// Allow a session to write.
    pub fn activate(&self, session: SessionId) {
        self.inner.lock().active_session = Some(session);
    }

    /// Revoke a session's write access. Returns `false` if it was not active.
    pub fn deactivate(&self, session: SessionId) -> bool {
        let mut inner = self.inner.lock();
        if inner.active_session == Some(session) {
            inner.active_session = None;
            return true;
        }
        false
    }

    /// Overwrite the minted count. Returns `false` if the write was suppressed.
    pub fn set_minted_count(&self, scope: WriteScope, value: u64) -> bool {
        self.write(scope, |state| overwrite_count(&mut state.minted_count, value))
    }

    /// Overwrite the max supply. Returns `false` if the write was suppressed.
    pub fn set_max_supply(&self, scope: WriteScope, value: u64) -> bool {
        self.write(scope, |state| overwrite_count(&mut state.max_supply, value))
    }

    /// Max-merge a root update. Returns `false` if the write was suppressed.
    pub fn merge_root_update(&self, scope: WriteScope, update: RootUpdate) -> bool {
        self.write(scope, |state| {
            merge_root_update(&mut state.last_root_update, update)
        })
    }

    /// Mark a field's fetch as failed and signal it.
    ///
    /// The field keeps its last known value.
    pub fn record_failure(&self, scope: WriteScope, field: SyncField, error: SyncError) -> bool {
        let applied = self.write(scope, |state| match field {
            SyncField::MintedCount => mark_failed(&mut state.minted_count),
            SyncField::MaxSupply => mark_failed(&mut state.max_supply),
            SyncField::LastRootUpdate => mark_failed(&mut state.last_root_update),
        });
        if applied {
            // No receivers is fine: nobody is showing a retry affordance.
            let _ = self.signals.send(SyncSignal {
                field,
                error,
                session: scope.session(),
            });
        }
        applied
    }

    fn write<F>(&self, scope: WriteScope, mutate: F) -> bool
    where
        F: FnOnce(&mut SyncState) -> bool,
    {
        let mut inner = self.inner.lock();

        if let WriteScope::Session(session) = scope {
            if inner.active_session != Some(session) {
                debug!(session = %session, "[sync] Suppressed write from inactive session");
                return false;
            }
        }

        if mutate(&mut inner.state) {
            inner.state.revision += 1;
            if let Err(violation) = invariant_supply_bound(&inner.state) {
                warn!(error = %violation, "[sync] Supply invariant violated by node data");
            }
            self.snapshots.send_replace(inner.state.clone());
        }
        true
    }
}
