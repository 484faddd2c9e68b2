//! Common data models for the session orchestrator
//!
//! This module defines the session record kept in the session store, the
//! leader lease, and the resource template handed to the provisioner.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Client-supplied opaque session identifier
pub type SessionId = String;

/// Identifier/address of a provisioned compute unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitRef(pub String);

impl UnitRef {
    /// Creates a unit reference
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the reference as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token identifying one creation attempt for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    /// Generates a fresh attempt id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// A unit is being provisioned
    Creating,
    /// The unit is provisioned and routable
    Ready,
    /// The unit is being torn down; terminal
    Deleting,
}

impl SessionStatus {
    /// Returns true if the session counts against the admission ceiling
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Creating | SessionStatus::Ready)
    }

    /// Returns true if `next` is a valid successor of this status
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Creating, SessionStatus::Ready)
                | (SessionStatus::Ready, SessionStatus::Deleting)
                // Recreation after the backing unit vanished
                | (SessionStatus::Ready, SessionStatus::Creating)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Creating => write!(f, "CREATING"),
            SessionStatus::Ready => write!(f, "READY"),
            SessionStatus::Deleting => write!(f, "DELETING"),
        }
    }
}

/// One record per active session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier (store key)
    pub session_id: SessionId,
    /// Backing unit; present iff status is READY
    pub unit_ref: Option<UnitRef>,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Creation timestamp, immutable
    pub created_at: DateTime<Utc>,
    /// Last routed request, monotonically non-decreasing
    pub last_active_at: DateTime<Utc>,
    /// Token of the creation in flight (or that produced the current unit)
    pub creation_attempt_id: Option<AttemptId>,
    /// When the record entered DELETING
    pub deleting_since: Option<DateTime<Utc>>,
    /// Unit still to be torn down while DELETING
    pub releasing_unit: Option<UnitRef>,
}

impl SessionRecord {
    /// Creates a fresh CREATING record
    pub fn creating(session_id: impl Into<SessionId>, attempt: AttemptId, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            unit_ref: None,
            status: SessionStatus::Creating,
            created_at: now,
            last_active_at: now,
            creation_attempt_id: Some(attempt),
            deleting_since: None,
            releasing_unit: None,
        }
    }

    /// Returns this record completed with its backing unit
    pub fn into_ready(mut self, unit_ref: UnitRef) -> Self {
        self.status = SessionStatus::Ready;
        self.unit_ref = Some(unit_ref);
        self
    }

    /// Returns this record marked for deletion
    ///
    /// `unit_ref` is cleared (it is only set while READY); the unit moves to
    /// `releasing_unit` so a retried sweep can still find what to delete.
    pub fn into_deleting(mut self, now: DateTime<Utc>) -> Self {
        self.status = SessionStatus::Deleting;
        self.deleting_since = Some(now);
        self.releasing_unit = self.unit_ref.take();
        self
    }

    /// Returns this record re-entering CREATING for a new attempt
    pub fn into_recreating(mut self, attempt: AttemptId) -> Self {
        self.status = SessionStatus::Creating;
        self.unit_ref = None;
        self.creation_attempt_id = Some(attempt);
        self
    }

    /// Advances `last_active_at`, never moving it backwards
    pub fn touch(&mut self, at: DateTime<Utc>) -> bool {
        if at > self.last_active_at {
            self.last_active_at = at;
            true
        } else {
            false
        }
    }

    /// Returns the routable unit if the session is READY
    pub fn ready_unit(&self) -> Option<&UnitRef> {
        match self.status {
            SessionStatus::Ready => self.unit_ref.as_ref(),
            _ => None,
        }
    }

    /// Returns true if the record was idle before `cutoff`
    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_active_at < cutoff
    }
}

/// Resource template passed to the provisioner for every new unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceTemplate {
    /// Container image of the session unit
    pub image: String,
    /// CPU limit in millicores
    pub cpu_millis: u32,
    /// Memory limit in MiB
    pub memory_mib: u32,
    /// Port the unit serves on
    pub port: u16,
    /// Extra labels attached to the unit
    pub labels: BTreeMap<String, String>,
}

impl Default for ResourceTemplate {
    fn default() -> Self {
        Self {
            image: "session-pod:latest".to_string(),
            cpu_millis: 500,
            memory_mib: 512,
            port: 8080,
            labels: BTreeMap::new(),
        }
    }
}

/// Shared record naming the current leader replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderLease {
    /// Replica holding the lease
    pub holder_id: String,
    /// When the holder first acquired the lease
    pub acquired_at: DateTime<Utc>,
    /// When the holder last renewed the lease
    pub renewed_at: DateTime<Utc>,
    /// Instant after which any replica may take the lease
    pub expires_at: DateTime<Utc>,
}

impl LeaderLease {
    /// Creates a lease held by `holder_id` from `now` for `ttl`
    pub fn new(holder_id: impl Into<String>, now: DateTime<Utc>, ttl: ChronoDuration) -> Self {
        Self {
            holder_id: holder_id.into(),
            acquired_at: now,
            renewed_at: now,
            expires_at: now + ttl,
        }
    }

    /// Returns the lease extended from `now`
    pub fn renewed(mut self, now: DateTime<Utc>, ttl: ChronoDuration) -> Self {
        self.renewed_at = now;
        self.expires_at = now + ttl;
        self
    }

    /// Check if this lease has expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns true if `replica_id` holds this lease
    pub fn is_held_by(&self, replica_id: &str) -> bool {
        self.holder_id == replica_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_transitions_keep_invariants() {
        let now = Utc::now();
        let attempt = AttemptId::generate();
        let record = SessionRecord::creating("abc", attempt, now);
        assert_eq!(record.status, SessionStatus::Creating);
        assert!(record.unit_ref.is_none());
        assert!(record.ready_unit().is_none());

        let ready = record.into_ready(UnitRef::new("U1"));
        assert_eq!(ready.ready_unit(), Some(&UnitRef::new("U1")));
        assert_eq!(ready.creation_attempt_id, Some(attempt));

        let deleting = ready.into_deleting(now);
        assert_eq!(deleting.status, SessionStatus::Deleting);
        assert!(deleting.ready_unit().is_none());
        assert!(deleting.unit_ref.is_none());
        assert_eq!(deleting.releasing_unit, Some(UnitRef::new("U1")));
        assert_eq!(deleting.deleting_since, Some(now));
    }

    #[test]
    fn test_touch_is_monotonic() {
        let now = Utc::now();
        let mut record = SessionRecord::creating("abc", AttemptId::generate(), now);
        assert!(record.touch(now + ChronoDuration::seconds(5)));
        assert!(!record.touch(now));
        assert_eq!(record.last_active_at, now + ChronoDuration::seconds(5));
        assert!(record.last_active_at >= record.created_at);
    }

    #[test]
    fn test_status_transitions() {
        assert!(SessionStatus::Creating.can_transition_to(SessionStatus::Ready));
        assert!(SessionStatus::Ready.can_transition_to(SessionStatus::Deleting));
        assert!(!SessionStatus::Deleting.can_transition_to(SessionStatus::Ready));
        assert!(!SessionStatus::Creating.can_transition_to(SessionStatus::Deleting));
        assert_eq!(
            serde_json::to_string(&SessionStatus::Ready).unwrap(),
            "\"READY\""
        );
    }

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let lease = LeaderLease::new("replica-a", now, ChronoDuration::seconds(15));
        assert!(!lease.is_expired(now + ChronoDuration::seconds(14)));
        assert!(lease.is_expired(now + ChronoDuration::seconds(15)));

        let renewed = lease.renewed(now + ChronoDuration::seconds(10), ChronoDuration::seconds(15));
        assert!(!renewed.is_expired(now + ChronoDuration::seconds(20)));
        assert!(renewed.is_held_by("replica-a"));
        assert_eq!(renewed.acquired_at, now);
    }
}
