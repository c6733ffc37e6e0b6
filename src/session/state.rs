use std::sync::{Arc, RwLock};

use crate::session::index::CharacteristicDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// `last_error` is set when the previous connection attempt failed.
    Idle { last_error: Option<String> },
    Connecting { address: String },
    Connected { address: String },
    Disconnecting { address: String },
}

impl SessionState {
    pub fn address(&self) -> Option<&str> {
        match self {
            SessionState::Idle { .. } => None,
            SessionState::Connecting { address }
            | SessionState::Connected { address }
            | SessionState::Disconnecting { address } => Some(address),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle { last_error: None }
    }
}

/// Session state as seen from the control thread. Written only by the worker.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    current: Arc<RwLock<SessionState>>,
}

impl SharedState {
    pub fn get(&self) -> SessionState {
        match self.current.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set(&self, state: SessionState) {
        match self.current.write() {
            Ok(mut current) => *current = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Indexed { services: usize },
    /// The peripheral answered discovery with an empty service list.
    NoServices,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub address: String,
    pub discovery: DiscoveryOutcome,
    pub characteristics: Vec<CharacteristicDescriptor>,
}
