//! Session store contract
//!
//! All mutations except `touch` are conditional writes: the caller states
//! what it expects the stored record to look like and the store refuses the
//! write with [`WriteOutcome::Conflict`] when that expectation no longer
//! holds. This is the only exclusion mechanism for READY and DELETING
//! transitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;

use common::error::StoreError;
use common::models::{AttemptId, SessionRecord, SessionStatus, UnitRef};

/// Expectation about the stored record that must hold for a write to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Apply regardless of the stored record
    Unconditional,

    /// No record exists; with a ceiling, the live (CREATING + READY) count
    /// must also be below it
    Absent { live_ceiling: Option<usize> },

    /// The stored record has this status
    Status(SessionStatus),

    /// The stored record is CREATING under this attempt
    Attempt(AttemptId),

    /// The stored record is READY and backed by this unit
    ReadyUnit(UnitRef),

    /// The stored record is READY on `unit` and was last active before
    /// `cutoff`
    IdleBefore { cutoff: DateTime<Utc>, unit: UnitRef },
}

impl Precondition {
    /// Evaluates the precondition against the stored record
    ///
    /// `live_count` is only called for [`Precondition::Absent`] with a
    /// ceiling.
    pub fn evaluate<F>(&self, current: Option<&SessionRecord>, live_count: F) -> WriteOutcome
    where
        F: FnOnce() -> usize,
    {
        let holds = match (self, current) {
            (Precondition::Unconditional, _) => true,
            (Precondition::Absent { live_ceiling }, None) => {
                if let Some(ceiling) = live_ceiling {
                    if live_count() >= *ceiling {
                        return WriteOutcome::AtCapacity;
                    }
                }
                true
            }
            (Precondition::Absent { .. }, Some(_)) => false,
            (_, None) => false,
            (Precondition::Status(status), Some(record)) => record.status == *status,
            (Precondition::Attempt(attempt), Some(record)) => {
                record.status == SessionStatus::Creating && record.creation_attempt_id == Some(*attempt)
            }
            (Precondition::ReadyUnit(unit), Some(record)) => record.ready_unit() == Some(unit),
            (Precondition::IdleBefore { cutoff, unit }, Some(record)) => {
                record.ready_unit() == Some(unit) && record.is_idle_since(*cutoff)
            }
        };

        if holds {
            WriteOutcome::Applied
        } else {
            WriteOutcome::Conflict
        }
    }
}

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied
    Applied,
    /// The precondition did not hold; nothing changed
    Conflict,
    /// An insert was refused because the live ceiling was reached
    AtCapacity,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Selects records for a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFilter {
    /// Records whose `last_active_at` precedes the cutoff
    IdleBefore(DateTime<Utc>),
    /// Records with this status
    Status(SessionStatus),
}

impl ScanFilter {
    pub fn matches(&self, record: &SessionRecord) -> bool {
        match self {
            ScanFilter::IdleBefore(cutoff) => record.is_idle_since(*cutoff),
            ScanFilter::Status(status) => record.status == *status,
        }
    }
}

/// One page of a scan
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Matching records, ordered by session id
    pub records: Vec<SessionRecord>,
    /// Session id to resume after; `None` once the scan is exhausted
    pub next_cursor: Option<String>,
}

/// Shared durable map from session id to [`SessionRecord`]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Reads a record
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Writes `record` under its session id if `precondition` holds
    ///
    /// Replacing a record never moves `last_active_at` backwards: the stored
    /// value is kept when it is newer than the one being written. A write
    /// that would change status along an edge the lifecycle does not allow
    /// is a [`WriteOutcome::Conflict`].
    async fn put(&self, record: SessionRecord, precondition: Precondition) -> Result<WriteOutcome, StoreError>;

    /// Advances `last_active_at`; never creates a record or changes status
    ///
    /// Returns true if a record was updated.
    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Removes a record if `precondition` holds
    async fn delete(&self, session_id: &str, precondition: Precondition) -> Result<WriteOutcome, StoreError>;

    /// Returns up to `limit` matching records with ids strictly after `after`
    async fn scan(&self, filter: &ScanFilter, after: Option<&str>, limit: usize) -> Result<ScanPage, StoreError>;

    /// Number of CREATING + READY records
    async fn count_live(&self) -> Result<usize, StoreError>;

    /// Number of records with the given status
    async fn count_status(&self, status: SessionStatus) -> Result<usize, StoreError>;
}

struct ScanCursor {
    store: Arc<dyn SessionStore>,
    filter: ScanFilter,
    page_size: usize,
    after: Option<String>,
    buffered: VecDeque<SessionRecord>,
    exhausted: bool,
}

/// Lazily pages through matching records
///
/// Pages are fetched on demand; `resume_after` restarts a scan from the
/// last session id a previous consumer saw.
pub fn scan_records(
    store: Arc<dyn SessionStore>,
    filter: ScanFilter,
    page_size: usize,
    resume_after: Option<String>,
) -> BoxStream<'static, Result<SessionRecord, StoreError>> {
    let cursor = ScanCursor {
        store,
        filter,
        page_size: page_size.max(1),
        after: resume_after,
        buffered: VecDeque::new(),
        exhausted: false,
    };

    stream::try_unfold(cursor, |mut cursor| async move {
        loop {
            if let Some(record) = cursor.buffered.pop_front() {
                return Ok(Some((record, cursor)));
            }
            if cursor.exhausted {
                return Ok::<_, StoreError>(None);
            }

            let page = cursor
                .store
                .scan(&cursor.filter, cursor.after.as_deref(), cursor.page_size)
                .await?;

            cursor.exhausted = page.next_cursor.is_none();
            cursor.after = page.next_cursor;
            cursor.buffered.extend(page.records);
        }
    })
    .boxed()
}

/// Records whose last activity precedes `older_than`
pub fn scan_idle(
    store: Arc<dyn SessionStore>,
    older_than: DateTime<Utc>,
    page_size: usize,
) -> BoxStream<'static, Result<SessionRecord, StoreError>> {
    scan_records(store, ScanFilter::IdleBefore(older_than), page_size, None)
}
