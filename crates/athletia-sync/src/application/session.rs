//! # Connection Session
//!
//! One live-subscription lifetime: `Unattached -> Attached -> Detached`.
//! A detached session is never reused; re-attaching creates a new one.

use crate::domain::{
    invariant_session_transition, ConnectionId, SessionId, SessionState, SyncError,
};
use crate::ports::NodeConnection;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to the listeners registered for one connection.
pub struct ConnectionSession {
    id: SessionId,
    connection: Arc<dyn NodeConnection>,
    state: Mutex<SessionState>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl ConnectionSession {
    pub(crate) fn new(connection: Arc<dyn NodeConnection>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id: SessionId::new(),
            connection,
            state: Mutex::new(SessionState::Unattached),
            listeners: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// Session identity.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Identity of the connection this session listens on.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.connection_id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether listeners are live.
    pub fn is_attached(&self) -> bool {
        self.state() == SessionState::Attached
    }

    /// Number of listener tasks owned by this session.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// `Unattached -> Attached`, taking ownership of the listener tasks.
    pub(crate) fn mark_attached(&self, listeners: Vec<JoinHandle<()>>) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        if let Err(e) = invariant_session_transition(*state, SessionState::Attached) {
            for listener in listeners {
                listener.abort();
            }
            return Err(e);
        }
        *state = SessionState::Attached;
        self.listeners.lock().extend(listeners);
        Ok(())
    }

    /// Cancel listeners and unsubscribe. Returns `false` if already detached.
    pub(crate) async fn close(&self) -> bool {
        let listeners = {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return false;
            }
            *state = SessionState::Detached;
            std::mem::take(&mut *self.listeners.lock())
        };

        self.shutdown.send_replace(true);
        for listener in listeners {
            listener.abort();
        }
        self.connection.unsubscribe_all().await;
        true
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("connection", &self.connection_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        // Unsubscribing needs the runtime; at least stop our own tasks.
        self.shutdown.send_replace(true);
        for listener in self.listeners.get_mut().drain(..) {
            listener.abort();
        }
    }
}
