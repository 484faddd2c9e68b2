//! Session lifecycle counters
//!
//! Counters are kept locally (for the JSON snapshot served by the API) and
//! mirrored to the `metrics` facade, which the binary may route to a
//! Prometheus exporter.

use metrics::{gauge, increment_counter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use common::types::DeletionReason;

/// Counters of one replica
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Units created and recorded READY
    creations_succeeded: AtomicU64,

    /// Creations rolled back
    creations_failed: AtomicU64,

    /// Requests refused at the concurrency ceiling
    admission_rejections: AtomicU64,

    /// Vanished units provisioned again
    recreations: AtomicU64,

    deletions_idle: AtomicU64,
    deletions_reconciliation: AtomicU64,
    deletions_explicit: AtomicU64,

    /// Conditional-write conflicts abandoned by the sweeps
    sweep_conflicts: AtomicU64,

    /// READY sessions as last counted
    ready_sessions: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub creations_succeeded: u64,
    pub creations_failed: u64,
    pub admission_rejections: u64,
    pub recreations: u64,
    pub deletions_idle: u64,
    pub deletions_reconciliation: u64,
    pub deletions_explicit: u64,
    pub sweep_conflicts: u64,
    pub ready_sessions: u64,
}

impl MetricsSnapshot {
    /// Deletions for every reason
    pub fn deletions_total(&self) -> u64 {
        self.deletions_idle + self.deletions_reconciliation + self.deletions_explicit
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_creation_success(&self) {
        self.creations_succeeded.fetch_add(1, Ordering::Relaxed);
        increment_counter!("session_creations_total", "outcome" => "success");
    }

    pub fn record_creation_failure(&self) {
        self.creations_failed.fetch_add(1, Ordering::Relaxed);
        increment_counter!("session_creations_total", "outcome" => "failure");
    }

    pub fn record_admission_rejection(&self) {
        self.admission_rejections.fetch_add(1, Ordering::Relaxed);
        increment_counter!("session_admission_rejections_total");
    }

    pub fn record_recreation(&self) {
        self.recreations.fetch_add(1, Ordering::Relaxed);
        increment_counter!("session_recreations_total");
    }

    pub fn record_deletion(&self, reason: DeletionReason) {
        let counter = match reason {
            DeletionReason::Idle => &self.deletions_idle,
            DeletionReason::Reconciliation => &self.deletions_reconciliation,
            DeletionReason::Explicit => &self.deletions_explicit,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        increment_counter!("session_deletions_total", "reason" => reason.as_str());
    }

    pub fn record_sweep_conflict(&self) {
        self.sweep_conflicts.fetch_add(1, Ordering::Relaxed);
        increment_counter!("session_sweep_conflicts_total");
    }

    /// Updates the READY gauge
    pub fn set_ready_sessions(&self, count: usize) {
        self.ready_sessions.store(count as u64, Ordering::Relaxed);
        gauge!("sessions_ready", count as f64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            creations_succeeded: self.creations_succeeded.load(Ordering::Relaxed),
            creations_failed: self.creations_failed.load(Ordering::Relaxed),
            admission_rejections: self.admission_rejections.load(Ordering::Relaxed),
            recreations: self.recreations.load(Ordering::Relaxed),
            deletions_idle: self.deletions_idle.load(Ordering::Relaxed),
            deletions_reconciliation: self.deletions_reconciliation.load(Ordering::Relaxed),
            deletions_explicit: self.deletions_explicit.load(Ordering::Relaxed),
            sweep_conflicts: self.sweep_conflicts.load(Ordering::Relaxed),
            ready_sessions: self.ready_sessions.load(Ordering::Relaxed),
        }
    }
}
