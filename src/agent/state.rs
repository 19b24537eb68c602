//! Agent lifecycle states and the transition table that governs them.
//!
//! The table is data, not behavior: `TRANSITIONS[from][to]` enumerates
//! the full relation. An invalid transition fails without mutating
//! state, so a late `job_available` can never push an executing agent
//! back into leasing.

use parking_lot::RwLock;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Unregistered,
    Registering,
    Idle,
    Leasing,
    Executing,
    Upgrading,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentState::Unregistered => "unregistered",
            AgentState::Registering => "registering",
            AgentState::Idle => "idle",
            AgentState::Leasing => "leasing",
            AgentState::Executing => "executing",
            AgentState::Upgrading => "upgrading",
        };
        write!(f, "{name}")
    }
}

const STATE_COUNT: usize = 6;

// Rows are `from`, columns are `to`, in declaration order:
// unregistered, registering, idle, leasing, executing, upgrading.
const TRANSITIONS: [[bool; STATE_COUNT]; STATE_COUNT] = [
    [false, true, false, false, false, false], // unregistered -> registering
    [true, false, true, false, false, false],  // registering -> unregistered | idle
    [false, false, false, true, false, true],  // idle -> leasing | upgrading
    [false, false, true, false, true, false],  // leasing -> idle | executing
    [false, false, true, false, false, false], // executing -> idle
    [true, false, true, false, false, false],  // upgrading -> unregistered | idle
];

/// Current state behind a read/write lock. `transition` validates under
/// the write lock; nothing awaits inside the critical section.
pub struct StateMachine {
    state: RwLock<AgentState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AgentState::Unregistered),
        }
    }

    pub fn current(&self) -> AgentState {
        *self.state.read()
    }

    pub fn transition(&self, to: AgentState) -> Result<()> {
        let mut state = self.state.write();
        let from = *state;
        if !TRANSITIONS[from as usize][to as usize] {
            tracing::warn!(%from, %to, "Rejected invalid state transition");
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(%from, %to, "State transition");
        *state = to;
        Ok(())
    }
}
