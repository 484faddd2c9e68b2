//! Session store access for the session orchestrator
//!
//! This crate defines the shared-state contracts the lifecycle engine is
//! built on: the conditional-write session store, the per-session
//! reservation lock and the leader lease. Each contract ships with an
//! in-memory backend that every replica in a process can share.

pub mod lease;
pub mod lock;
pub mod memory;
pub mod store;

// Re-export commonly used types
pub use lease::{InMemoryLeaseStore, LeaseOutcome, LeaseStore};
pub use lock::{Acquisition, InMemoryReservationLock, LockToken, ReservationLock};
pub use memory::InMemorySessionStore;
pub use store::{scan_idle, scan_records, Precondition, ScanFilter, ScanPage, SessionStore, WriteOutcome};
