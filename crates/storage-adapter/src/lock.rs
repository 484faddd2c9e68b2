//! Per-session reservation lock
//!
//! A short-lived, TTL-bounded lock held by whichever replica is creating a
//! session's unit. Expiry bounds the damage of a holder that crashes
//! mid-creation.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use common::error::StoreError;

/// Proof of holding a reservation; required to release it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a lock acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The caller now holds the lock
    Acquired(LockToken),
    /// Another holder has an unexpired reservation
    AlreadyHeld,
}

/// TTL-bounded exclusive reservation keyed by session id
#[async_trait]
pub trait ReservationLock: Send + Sync {
    /// Takes the reservation unless an unexpired one exists
    async fn acquire(&self, session_id: &str, ttl: Duration) -> Result<Acquisition, StoreError>;

    /// Releases the reservation if `token` still owns it
    ///
    /// Returns false if the reservation expired and was taken over.
    async fn release(&self, session_id: &str, token: LockToken) -> Result<bool, StoreError>;

    /// Returns true if an unexpired reservation exists
    async fn is_held(&self, session_id: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    token: LockToken,
    expires_at: Instant,
}

/// Reservation lock backed by a concurrent map
pub struct InMemoryReservationLock {
    reservations: DashMap<String, Reservation>,
    available: AtomicBool,
}

impl InMemoryReservationLock {
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
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
            Err(StoreError::Unavailable("reservation lock disabled".to_string()))
        }
    }
}

impl Default for InMemoryReservationLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReservationLock for InMemoryReservationLock {
    async fn acquire(&self, session_id: &str, ttl: Duration) -> Result<Acquisition, StoreError> {
        self.ensure_available()?;

        let now = Instant::now();
        let fresh = Reservation {
            token: LockToken::generate(),
            expires_at: now + ttl,
        };

        let acquisition = match self.reservations.entry(session_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at > now {
                    Acquisition::AlreadyHeld
                } else {
                    debug!(session_id, "Taking over expired reservation");
                    entry.insert(fresh);
                    Acquisition::Acquired(fresh.token)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
                Acquisition::Acquired(fresh.token)
            }
        };

        Ok(acquisition)
    }

    async fn release(&self, session_id: &str, token: LockToken) -> Result<bool, StoreError> {
        self.ensure_available()?;
        Ok(self
            .reservations
            .remove_if(session_id, |_, reservation| reservation.token == token)
            .is_some())
    }

    async fn is_held(&self, session_id: &str) -> Result<bool, StoreError> {
        self.ensure_available()?;
        Ok(self
            .reservations
            .get(session_id)
            .map(|reservation| reservation.expires_at > Instant::now())
            .unwrap_or(false))
    }
}
