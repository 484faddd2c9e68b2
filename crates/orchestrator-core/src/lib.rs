//! Core session lifecycle logic for the session orchestrator
//!
//! This crate composes the session store, reservation lock, unit
//! provisioner and leader lease into the lifecycle engine: resolve-or-create
//! on the request path, plus the leader-only idle and reconciliation sweeps
//! run by the background lifecycle manager.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod lifecycle;
pub mod metrics;
pub mod state;
pub mod sweeps;

// Re-export commonly used types
pub use config::EngineConfig;
pub use coordinator::LeadershipCoordinator;
pub use engine::LifecycleEngine;
pub use lifecycle::LifecycleManager;
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use state::OrchestratorState;
pub use sweeps::{SweepReport, SweepStatus};
