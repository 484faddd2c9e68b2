//! Service state of one orchestrator replica

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of the replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    /// Background loops are being started
    Starting,

    /// Serving requests; background loops healthy
    Serving,

    /// Serving, but a dependency is failing (no new sessions or no sweeps)
    Degraded(String),

    /// Background loops are being stopped
    Stopping,

    /// Stopped
    Stopped,
}

impl OrchestratorState {
    /// Creates a new orchestrator state
    pub fn new() -> Self {
        OrchestratorState::Starting
    }

    /// Returns true if the replica serves requests, degraded or not
    pub fn is_serving(&self) -> bool {
        matches!(self, OrchestratorState::Serving | OrchestratorState::Degraded(_))
    }

    /// Returns true if the replica is degraded
    pub fn is_degraded(&self) -> bool {
        matches!(self, OrchestratorState::Degraded(_))
    }

    /// Gets the reason if degraded
    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            OrchestratorState::Degraded(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Starting => write!(f, "Starting"),
            OrchestratorState::Serving => write!(f, "Serving"),
            OrchestratorState::Degraded(reason) => write!(f, "Degraded: {}", reason),
            OrchestratorState::Stopping => write!(f, "Stopping"),
            OrchestratorState::Stopped => write!(f, "Stopped"),
        }
    }
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::new()
    }
}
