//! Leadership coordination
//!
//! Lease-based single-leader election. Each replica periodically calls
//! [`LeadershipCoordinator::tick`] to acquire or renew the shared lease;
//! between ticks the replica trusts its local copy of the lease only until
//! that copy expires, so a replica that can no longer reach the lease store
//! stops acting as leader on its own.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use common::error::StoreError;
use common::models::LeaderLease;
use storage_adapter::{LeaseOutcome, LeaseStore};

/// Leadership coordinator for one replica
pub struct LeadershipCoordinator {
    /// Identity written into the lease
    replica_id: String,

    /// Shared lease record
    lease_store: Arc<dyn LeaseStore>,

    /// Lease expiry
    lease_ttl: ChronoDuration,

    /// Lease as last acquired or renewed by this replica
    held: RwLock<Option<LeaderLease>>,
}

impl LeadershipCoordinator {
    /// Creates a new coordinator
    pub fn new(replica_id: impl Into<String>, lease_store: Arc<dyn LeaseStore>, lease_ttl: Duration) -> Self {
        Self {
            replica_id: replica_id.into(),
            lease_store,
            lease_ttl: ChronoDuration::milliseconds(lease_ttl.as_millis().min(i64::MAX as u128) as i64),
            held: RwLock::new(None),
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Acquires or renews the lease; returns whether this replica leads
    pub async fn tick(&self) -> Result<bool, StoreError> {
        self.tick_at(Utc::now()).await
    }

    /// Acquires or renews the lease as of `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let was_leader = self.is_leader_at(now);

        let outcome = match self.lease_store.try_acquire(&self.replica_id, now, self.lease_ttl).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Keep the local lease; it lapses on its own at expiry
                warn!("Failed to renew leader lease for {}: {}", self.replica_id, e);
                return Err(e);
            }
        };

        match outcome {
            LeaseOutcome::Acquired(lease) => {
                info!(replica_id = %self.replica_id, expires_at = %lease.expires_at, "Acquired leadership");
                *self.held.write() = Some(lease);
                Ok(true)
            }
            LeaseOutcome::Renewed(lease) => {
                trace!(replica_id = %self.replica_id, expires_at = %lease.expires_at, "Renewed leadership");
                *self.held.write() = Some(lease);
                Ok(true)
            }
            LeaseOutcome::HeldByOther(lease) => {
                if was_leader {
                    warn!(
                        replica_id = %self.replica_id,
                        leader = %lease.holder_id,
                        "Lost leadership"
                    );
                } else {
                    debug!(replica_id = %self.replica_id, leader = %lease.holder_id, "Following");
                }
                *self.held.write() = None;
                Ok(false)
            }
        }
    }

    /// Returns true if this replica holds an unexpired lease
    pub fn is_leader(&self) -> bool {
        self.is_leader_at(Utc::now())
    }

    pub fn is_leader_at(&self, now: DateTime<Utc>) -> bool {
        self.held
            .read()
            .as_ref()
            .map(|lease| !lease.is_expired(now))
            .unwrap_or(false)
    }

    /// Gives up leadership so another replica can take over immediately
    pub async fn step_down(&self) -> Result<(), StoreError> {
        let held = self.held.write().take();
        if held.is_some() {
            info!(replica_id = %self.replica_id, "Stepping down as leader");
            self.lease_store.release(&self.replica_id).await?;
        }
        Ok(())
    }
}
