//! In-memory session store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

use common::error::StoreError;
use common::models::{SessionRecord, SessionStatus};

use crate::store::{Precondition, ScanFilter, ScanPage, SessionStore, WriteOutcome};

/// Session store backed by an ordered in-process map
///
/// Every conditional write evaluates its precondition and applies under one
/// write lock, so replicas sharing an instance observe linearizable
/// compare-and-set semantics.
pub struct InMemorySessionStore {
    /// Records keyed by session id
    records: RwLock<BTreeMap<String, SessionRecord>>,

    /// Cleared to simulate an unreachable backend
    available: AtomicBool,
}

impl InMemorySessionStore {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`]
    /// (or succeed again)
    pub fn set_available(&self, available: bool) {
        debug!("Session store availability set to {}", available);
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of records, regardless of status
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of all records
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.records.read().values().cloned().collect()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store disabled".to_string()))
        }
    }

    fn live_count(records: &BTreeMap<String, SessionRecord>) -> usize {
        records.values().filter(|r| r.status.is_live()).count()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.ensure_available()?;
        Ok(self.records.read().get(session_id).cloned())
    }

    async fn put(&self, mut record: SessionRecord, precondition: Precondition) -> Result<WriteOutcome, StoreError> {
        self.ensure_available()?;
        debug_assert_eq!(
            record.unit_ref.is_some(),
            record.status == SessionStatus::Ready,
            "unit_ref must be set exactly when READY"
        );

        let mut records = self.records.write();
        let mut outcome = precondition.evaluate(records.get(&record.session_id), || Self::live_count(&records));

        if let (true, Some(existing)) = (outcome.is_applied(), records.get(&record.session_id)) {
            if existing.status != record.status && !existing.status.can_transition_to(record.status) {
                warn!(
                    session_id = %record.session_id,
                    from = %existing.status,
                    to = %record.status,
                    "Refused illegal status transition"
                );
                outcome = WriteOutcome::Conflict;
            }
        }

        trace!(
            session_id = %record.session_id,
            status = %record.status,
            ?precondition,
            ?outcome,
            "put"
        );

        if outcome.is_applied() {
            if let Some(existing) = records.get(&record.session_id) {
                record.last_active_at = record.last_active_at.max(existing.last_active_at);
            }
            records.insert(record.session_id.clone(), record);
        }
        Ok(outcome)
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.ensure_available()?;
        Ok(self
            .records
            .write()
            .get_mut(session_id)
            .map(|record| record.touch(at))
            .unwrap_or(false))
    }

    async fn delete(&self, session_id: &str, precondition: Precondition) -> Result<WriteOutcome, StoreError> {
        self.ensure_available()?;

        let mut records = self.records.write();
        let outcome = precondition.evaluate(records.get(session_id), || Self::live_count(&records));

        trace!(session_id, ?precondition, ?outcome, "delete");

        if outcome.is_applied() {
            records.remove(session_id);
        }
        Ok(outcome)
    }

    async fn scan(&self, filter: &ScanFilter, after: Option<&str>, limit: usize) -> Result<ScanPage, StoreError> {
        self.ensure_available()?;

        let records = self.records.read();
        let lower = match after {
            Some(key) => Bound::Excluded(key.to_string()),
            None => Bound::Unbounded,
        };

        let page: Vec<SessionRecord> = records
            .range((lower, Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| filter.matches(record))
            .take(limit)
            .cloned()
            .collect();

        let next_cursor = if page.len() == limit {
            page.last().map(|record| record.session_id.clone())
        } else {
            None
        };

        Ok(ScanPage {
            records: page,
            next_cursor,
        })
    }

    async fn count_live(&self) -> Result<usize, StoreError> {
        self.ensure_available()?;
        Ok(Self::live_count(&self.records.read()))
    }

    async fn count_status(&self, status: SessionStatus) -> Result<usize, StoreError> {
        self.ensure_available()?;
        Ok(self.records.read().values().filter(|r| r.status == status).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{scan_idle, scan_records};
    use chrono::Duration;
    use common::models::{AttemptId, UnitRef};
    use futures::TryStreamExt;
    use std::sync::Arc;

    fn ready(id: &str, last_active_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord::creating(id, AttemptId::generate(), last_active_at).into_ready(UnitRef::new(format!("unit-{}", id)))
    }

    #[tokio::test]
    async fn test_conditional_insert_is_exclusive() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        let absent = Precondition::Absent { live_ceiling: None };

        let first = SessionRecord::creating("abc", AttemptId::generate(), now);
        let second = SessionRecord::creating("abc", AttemptId::generate(), now);

        assert_eq!(store.put(first.clone(), absent.clone()).await.unwrap(), WriteOutcome::Applied);
        assert_eq!(store.put(second, absent).await.unwrap(), WriteOutcome::Conflict);
        assert_eq!(store.get("abc").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_refused() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        let record = ready("abc", now);
        store.put(record.clone(), Precondition::Unconditional).await.unwrap();

        let deleting = record.clone().into_deleting(now);
        assert_eq!(
            store.put(deleting.clone(), Precondition::Unconditional).await.unwrap(),
            WriteOutcome::Applied
        );

        // A DELETING record never comes back to READY or CREATING
        assert_eq!(
            store.put(record.clone(), Precondition::Unconditional).await.unwrap(),
            WriteOutcome::Conflict
        );
        assert_eq!(
            store
                .put(record.into_recreating(AttemptId::generate()), Precondition::Unconditional)
                .await
                .unwrap(),
            WriteOutcome::Conflict
        );

        // Rewriting the same status is allowed
        assert_eq!(
            store.put(deleting.clone(), Precondition::Status(SessionStatus::Deleting)).await.unwrap(),
            WriteOutcome::Applied
        );
        assert_eq!(store.get("abc").await.unwrap().unwrap().status, SessionStatus::Deleting);
    }

    #[tokio::test]
    async fn test_live_ceiling_counts_creating_and_ready() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        let capped = Precondition::Absent { live_ceiling: Some(2) };

        store.put(ready("a", now), capped.clone()).await.unwrap();
        store
            .put(SessionRecord::creating("b", AttemptId::generate(), now), capped.clone())
            .await
            .unwrap();

        let outcome = store
            .put(SessionRecord::creating("c", AttemptId::generate(), now), capped.clone())
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::AtCapacity);
        assert_eq!(store.count_live().await.unwrap(), 2);

        // DELETING records do not count
        let deleting = ready("a", now).into_deleting(now);
        store.put(deleting, Precondition::Status(SessionStatus::Ready)).await.unwrap();
        let outcome = store
            .put(SessionRecord::creating("c", AttemptId::generate(), now), capped)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);
        assert_eq!(store.count_status(SessionStatus::Deleting).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_touch_is_monotonic_and_never_creates() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();

        assert!(!store.touch("missing", now).await.unwrap());
        assert!(store.get("missing").await.unwrap().is_none());

        store
            .put(ready("abc", now), Precondition::Absent { live_ceiling: None })
            .await
            .unwrap();

        let later = now + Duration::seconds(5);
        assert!(store.touch("abc", later).await.unwrap());
        assert!(!store.touch("abc", now).await.unwrap());
        assert_eq!(store.get("abc").await.unwrap().unwrap().last_active_at, later);
    }

    #[tokio::test]
    async fn test_put_keeps_newer_activity() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        let attempt = AttemptId::generate();
        let creating = SessionRecord::creating("abc", attempt, now);

        store
            .put(creating.clone(), Precondition::Absent { live_ceiling: None })
            .await
            .unwrap();
        store.touch("abc", now + Duration::seconds(3)).await.unwrap();

        // Completion carries the stale timestamp of the CREATING record
        let outcome = store
            .put(creating.into_ready(UnitRef::new("U1")), Precondition::Attempt(attempt))
            .await
            .unwrap();
        assert!(outcome.is_applied());

        let stored = store.get("abc").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Ready);
        assert_eq!(stored.last_active_at, now + Duration::seconds(3));
    }

    #[tokio::test]
    async fn test_idle_delete_loses_to_touch() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        let cutoff = now - Duration::seconds(600);

        store
            .put(ready("abc", now - Duration::seconds(601)), Precondition::Unconditional)
            .await
            .unwrap();
        store.touch("abc", now).await.unwrap();

        let record = store.get("abc").await.unwrap().unwrap();
        let idle = Precondition::IdleBefore {
            cutoff,
            unit: UnitRef::new("unit-abc"),
        };
        let outcome = store.put(record.into_deleting(now), idle).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Conflict);
        assert_eq!(store.get("abc").await.unwrap().unwrap().status, SessionStatus::Ready);
    }

    #[tokio::test]
    async fn test_scan_pages_in_key_order() {
        let store = Arc::new(InMemorySessionStore::new());
        let now = Utc::now();
        for i in 0..7 {
            store
                .put(ready(&format!("s{}", i), now - Duration::seconds(700)), Precondition::Unconditional)
                .await
                .unwrap();
        }
        store
            .put(ready("fresh", now), Precondition::Unconditional)
            .await
            .unwrap();

        let first = store
            .scan(&ScanFilter::IdleBefore(now - Duration::seconds(600)), None, 3)
            .await
            .unwrap();
        assert_eq!(first.records.len(), 3);
        assert_eq!(first.next_cursor.as_deref(), Some("s2"));

        let idle: Vec<SessionRecord> = scan_idle(store.clone(), now - Duration::seconds(600), 3)
            .try_collect()
            .await
            .unwrap();
        let ids: Vec<&str> = idle.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s0", "s1", "s2", "s3", "s4", "s5", "s6"]);

        let resumed: Vec<SessionRecord> = scan_records(
            store.clone(),
            ScanFilter::Status(SessionStatus::Ready),
            2,
            Some("s4".to_string()),
        )
        .try_collect()
        .await
        .unwrap();
        let ids: Vec<&str> = resumed.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s5", "s6"]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = InMemorySessionStore::new();
        store.set_available(false);

        assert!(matches!(store.get("abc").await, Err(StoreError::Unavailable(_))));
        assert!(store.touch("abc", Utc::now()).await.is_err());
        assert!(store.count_live().await.is_err());

        store.set_available(true);
        assert_eq!(store.get("abc").await.unwrap(), None);
    }
}
