//! Leader lease storage
//!
//! A single shared [`LeaderLease`] record. Acquisition and renewal are one
//! compare-and-set so at most one replica holds an unexpired lease.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use common::error::StoreError;
use common::models::LeaderLease;

/// Result of an acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The candidate took a free or expired lease
    Acquired(LeaderLease),
    /// The candidate already held the lease and extended it
    Renewed(LeaderLease),
    /// Another replica holds an unexpired lease
    HeldByOther(LeaderLease),
}

/// Storage for the leader lease
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Current lease record, expired or not
    async fn current(&self) -> Result<Option<LeaderLease>, StoreError>;

    /// Acquires the lease if free, expired, or already held by `candidate`
    async fn try_acquire(
        &self,
        candidate: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<LeaseOutcome, StoreError>;

    /// Clears the lease if `holder` holds it
    async fn release(&self, holder: &str) -> Result<bool, StoreError>;
}

/// Lease store guarded by a mutex
pub struct InMemoryLeaseStore {
    lease: Mutex<Option<LeaderLease>>,
    available: AtomicBool,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self {
            lease: Mutex::new(None),
            available: AtomicBool::new(true),
        }
    }

    /// Makes every subsequent call fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("lease store disabled".to_string()))
        }
    }
}

impl Default for InMemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn current(&self) -> Result<Option<LeaderLease>, StoreError> {
        self.ensure_available()?;
        Ok(self.lease.lock().clone())
    }

    async fn try_acquire(
        &self,
        candidate: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<LeaseOutcome, StoreError> {
        self.ensure_available()?;

        let mut slot = self.lease.lock();
        let outcome = match slot.take() {
            Some(lease) if lease.is_held_by(candidate) && !lease.is_expired(now) => {
                LeaseOutcome::Renewed(lease.renewed(now, ttl))
            }
            Some(lease) if !lease.is_expired(now) => LeaseOutcome::HeldByOther(lease),
            previous => {
                if let Some(previous) = previous {
                    info!(
                        "Lease of {} expired at {}, taken over by {}",
                        previous.holder_id, previous.expires_at, candidate
                    );
                }
                LeaseOutcome::Acquired(LeaderLease::new(candidate, now, ttl))
            }
        };

        *slot = Some(match &outcome {
            LeaseOutcome::Acquired(lease) | LeaseOutcome::Renewed(lease) | LeaseOutcome::HeldByOther(lease) => {
                lease.clone()
            }
        });

        Ok(outcome)
    }

    async fn release(&self, holder: &str) -> Result<bool, StoreError> {
        self.ensure_available()?;

        let mut slot = self.lease.lock();
        match slot.as_ref() {
            Some(lease) if lease.is_held_by(holder) => {
                debug!("Lease released by {}", holder);
                *slot = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_holder() {
        let store = InMemoryLeaseStore::new();
        let now = Utc::now();
        let ttl = Duration::seconds(15);

        assert!(matches!(
            store.try_acquire("r1", now, ttl).await.unwrap(),
            LeaseOutcome::Acquired(_)
        ));
        assert!(matches!(
            store.try_acquire("r2", now, ttl).await.unwrap(),
            LeaseOutcome::HeldByOther(ref lease) if lease.holder_id == "r1"
        ));

        let renewed = store
            .try_acquire("r1", now + Duration::seconds(5), ttl)
            .await
            .unwrap();
        match renewed {
            LeaseOutcome::Renewed(lease) => {
                assert_eq!(lease.acquired_at, now);
                assert_eq!(lease.expires_at, now + Duration::seconds(20));
            }
            other => panic!("expected renewal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let store = InMemoryLeaseStore::new();
        let now = Utc::now();
        let ttl = Duration::seconds(15);

        store.try_acquire("r1", now, ttl).await.unwrap();
        let later = now + Duration::seconds(16);
        let outcome = store.try_acquire("r2", later, ttl).await.unwrap();
        assert!(matches!(outcome, LeaseOutcome::Acquired(ref lease) if lease.holder_id == "r2"));

        // The old holder cannot renew what it lost
        assert!(matches!(
            store.try_acquire("r1", later, ttl).await.unwrap(),
            LeaseOutcome::HeldByOther(_)
        ));
    }

    #[tokio::test]
    async fn test_release_only_by_holder() {
        let store = InMemoryLeaseStore::new();
        let now = Utc::now();
        store.try_acquire("r1", now, Duration::seconds(15)).await.unwrap();

        assert!(!store.release("r2").await.unwrap());
        assert!(store.release("r1").await.unwrap());
        assert!(store.current().await.unwrap().is_none());
        assert!(matches!(
            store.try_acquire("r2", now, Duration::seconds(15)).await.unwrap(),
            LeaseOutcome::Acquired(_)
        ));
    }
}
