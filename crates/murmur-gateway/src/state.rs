use tracing::{trace, warn};
use uuid::Uuid;

/// Lifecycle of one socket:
///
/// `Upgrading → Registered → (Reading ↔ Dispatching) → Closing → Terminal`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Upgrading,
    Registered,
    Reading,
    Dispatching,
    Closing,
    Terminal,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Upgrading, Registered)
                | (Registered, Reading)
                | (Reading, Dispatching)
                | (Dispatching, Reading)
                | (Reading, Closing)
                | (Closing, Terminal)
        )
    }
}

/// Tracks one connection's state and traces each move.
#[derive(Debug)]
pub struct StateTracker {
    conn_id: Uuid,
    state: ConnectionState,
}

impl StateTracker {
    pub fn new(conn_id: Uuid) -> Self {
        Self {
            conn_id,
            state: ConnectionState::Upgrading,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn advance(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            warn!(
                "Connection {} illegal transition {:?} -> {:?}",
                self.conn_id, self.state, next
            );
            debug_assert!(false, "illegal transition {:?} -> {:?}", self.state, next);
        }
        trace!("Connection {} {:?} -> {:?}", self.conn_id, self.state, next);
        self.state = next;
    }
}
