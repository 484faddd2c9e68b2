//! Common types for the session orchestrator
//!
//! This module defines small enums shared between the engine, the
//! provisioner adapter and the metrics surface.

use std::fmt;
use serde::{Deserialize, Serialize};

/// What the reconciliation sweep does when a READY session's unit is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Re-provision under the same session id
    Recreate,
    /// Drop the record; the next request starts a fresh session
    Remove,
}

impl RecoveryPolicy {
    /// Maps the `recreate_on_vanish` flag to a policy
    pub fn from_recreate_flag(recreate_on_vanish: bool) -> Self {
        if recreate_on_vanish {
            RecoveryPolicy::Recreate
        } else {
            RecoveryPolicy::Remove
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        RecoveryPolicy::Recreate
    }
}

impl fmt::Display for RecoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPolicy::Recreate => write!(f, "recreate"),
            RecoveryPolicy::Remove => write!(f, "remove"),
        }
    }
}

/// Why a session's unit was deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    /// Inactive past the idle timeout
    Idle,
    /// Drift repair found the unit missing or the record stale
    Reconciliation,
    /// Deleted on request
    Explicit,
}

impl DeletionReason {
    /// Label value used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionReason::Idle => "idle",
            DeletionReason::Reconciliation => "reconciliation",
            DeletionReason::Explicit => "explicit",
        }
    }
}

impl fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of describing a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPresence {
    /// The unit exists
    Present,
    /// The unit does not exist
    Absent,
}
