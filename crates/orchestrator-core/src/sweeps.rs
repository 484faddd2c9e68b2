//! Leader-only periodic sweeps
//!
//! The idle sweep reclaims sessions nobody used within the idle timeout;
//! the reconciliation sweep repairs sessions whose unit vanished and clears
//! CREATING records abandoned by crashed creators. Every transition is a
//! conditional write, so a conflict means live traffic or another path won
//! the race: the record is skipped, never reported as an error.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use common::error::{ProvisionerError, SessionError};
use common::models::{AttemptId, SessionRecord, SessionStatus, UnitRef};
use common::types::{DeletionReason, RecoveryPolicy, UnitPresence};
use storage_adapter::{
    scan_idle, scan_records, Acquisition, Precondition, ReservationLock, ScanFilter, SessionStore, WriteOutcome,
};
use unit_provisioner::UnitProvisioner;

use crate::engine::LifecycleEngine;

/// How a sweep cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    /// Every candidate was processed
    Completed,
    /// This replica is not the leader; nothing was done
    NotLeader,
    /// The previous cycle is still running; this one was skipped
    AlreadyRunning,
    /// Leadership was lost mid-cycle; remaining candidates were left alone
    LeadershipLost,
}

/// Summary of one sweep cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub status: SweepStatus,
    /// Candidates looked at
    pub examined: usize,
    /// Sessions deleted (idle or vanished)
    pub reclaimed: usize,
    /// Sessions whose vanished unit was provisioned again
    pub recreated: usize,
    /// DELETING records whose deletion was finished on retry
    pub retried: usize,
    /// Abandoned CREATING records removed
    pub stale_removed: usize,
    /// Candidates abandoned after a conflict or held reservation
    pub skipped: usize,
    /// Candidates left for the next cycle after a provisioner failure
    pub failed: usize,
}

impl SweepReport {
    fn with_status(status: SweepStatus) -> Self {
        Self {
            status,
            examined: 0,
            reclaimed: 0,
            recreated: 0,
            retried: 0,
            stale_removed: 0,
            skipped: 0,
            failed: 0,
        }
    }

    fn completed() -> Self {
        Self::with_status(SweepStatus::Completed)
    }

    fn changed_anything(&self) -> bool {
        self.reclaimed + self.recreated + self.retried + self.stale_removed > 0
    }
}

fn chrono_duration(duration: Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

impl LifecycleEngine {
    /// Runs one idle sweep as of now
    pub async fn run_idle_sweep(&self) -> Result<SweepReport, SessionError> {
        self.run_idle_sweep_at(Utc::now()).await
    }

    /// Runs one idle sweep, treating `now` as the current time
    pub async fn run_idle_sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, SessionError> {
        let _running = match self.idle_sweep_running.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Idle sweep still running, skipping cycle");
                return Ok(SweepReport::with_status(SweepStatus::AlreadyRunning));
            }
        };

        if !self.leadership.is_leader() {
            return Ok(SweepReport::with_status(SweepStatus::NotLeader));
        }

        let cutoff = now - chrono_duration(self.config.idle_timeout);
        let mut report = SweepReport::completed();

        let mut idle = scan_idle(self.store.clone(), cutoff, self.config.scan_page_size);
        while let Some(record) = idle.next().await {
            let record = record?;
            if record.status != SessionStatus::Ready {
                continue;
            }
            report.examined += 1;

            if !self.leadership.is_leader() {
                warn!("Lost leadership during idle sweep, aborting cycle");
                report.status = SweepStatus::LeadershipLost;
                break;
            }

            match self.reclaim_if_idle(record, cutoff, now).await {
                Ok(true) => report.reclaimed += 1,
                Ok(false) => report.skipped += 1,
                Err(SessionError::ProvisionerUnavailable(e)) => {
                    warn!(error = %e, "Unit delete failed, will retry next cycle");
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if report.status == SweepStatus::Completed {
            self.retry_stuck_deletions(now, &mut report).await?;
        }

        self.refresh_gauges().await?;

        if report.changed_anything() || report.failed > 0 {
            info!(
                reclaimed = report.reclaimed,
                retried = report.retried,
                skipped = report.skipped,
                failed = report.failed,
                "Idle sweep finished"
            );
        } else {
            debug!(examined = report.examined, "Idle sweep finished");
        }

        Ok(report)
    }

    /// Moves one idle READY session to DELETING and tears it down
    ///
    /// Returns false if the session became active, moved to another unit or
    /// is already being deleted by another path.
    async fn reclaim_if_idle(
        &self,
        record: SessionRecord,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        let unit = match record.ready_unit() {
            Some(unit) => unit.clone(),
            None => return Ok(false),
        };
        let session_id = record.session_id.clone();
        let deleting = record.into_deleting(now);

        match self
            .store
            .put(deleting.clone(), Precondition::IdleBefore { cutoff, unit })
            .await?
        {
            WriteOutcome::Applied => {}
            _ => {
                debug!(session_id = %session_id, "Skipped idle candidate: active again, recreated or already deleting");
                self.metrics.record_sweep_conflict();
                return Ok(false);
            }
        }

        self.finish_deletion(deleting, DeletionReason::Idle).await
    }

    /// Finishes deletions whose unit delete failed in an earlier cycle
    async fn retry_stuck_deletions(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<(), SessionError> {
        let grace = now - chrono_duration(self.config.sweep_interval);

        let mut deleting = scan_records(
            self.store.clone(),
            ScanFilter::Status(SessionStatus::Deleting),
            self.config.scan_page_size,
            None,
        );
        while let Some(record) = deleting.next().await {
            let record = record?;
            let stuck = record.deleting_since.map(|since| since < grace).unwrap_or(true);
            if !stuck {
                continue;
            }
            report.examined += 1;

            if !self.leadership.is_leader() {
                report.status = SweepStatus::LeadershipLost;
                break;
            }

            debug!(session_id = %record.session_id, "Retrying stuck deletion");
            match self.finish_deletion(record, DeletionReason::Idle).await {
                Ok(true) => report.retried += 1,
                Ok(false) => report.skipped += 1,
                Err(SessionError::ProvisionerUnavailable(e)) => {
                    warn!(error = %e, "Unit delete failed again");
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Runs one reconciliation sweep as of now
    pub async fn run_reconciliation_sweep(&self) -> Result<SweepReport, SessionError> {
        self.run_reconciliation_sweep_at(Utc::now()).await
    }

    /// Runs one reconciliation sweep, treating `now` as the current time
    pub async fn run_reconciliation_sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, SessionError> {
        let _running = match self.reconcile_running.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Reconciliation sweep still running, skipping cycle");
                return Ok(SweepReport::with_status(SweepStatus::AlreadyRunning));
            }
        };

        if !self.leadership.is_leader() {
            return Ok(SweepReport::with_status(SweepStatus::NotLeader));
        }

        let mut report = SweepReport::completed();

        let mut ready = scan_records(
            self.store.clone(),
            ScanFilter::Status(SessionStatus::Ready),
            self.config.scan_page_size,
            None,
        );
        while let Some(record) = ready.next().await {
            let record = record?;
            let unit = match record.ready_unit() {
                Some(unit) => unit.clone(),
                None => continue,
            };
            report.examined += 1;

            match self.provisioner.describe(&unit).await {
                Ok(UnitPresence::Present) => continue,
                Ok(UnitPresence::Absent) => {}
                Err(e) => {
                    // Transient or permanent alike: not retried within this cycle
                    debug!(session_id = %record.session_id, unit_ref = %unit, error = %e, "Describe failed, skipping");
                    report.failed += 1;
                    continue;
                }
            }

            if !self.leadership.is_leader() {
                warn!("Lost leadership during reconciliation sweep, aborting cycle");
                report.status = SweepStatus::LeadershipLost;
                break;
            }

            warn!(session_id = %record.session_id, unit_ref = %unit, "Unit vanished");
            match self.config.recovery_policy {
                RecoveryPolicy::Recreate => match self.recreate(record, unit).await {
                    Ok(true) => report.recreated += 1,
                    Ok(false) => report.skipped += 1,
                    Err(SessionError::StoreUnavailable(e)) => return Err(e.into()),
                    Err(e) => {
                        warn!(error = %e, "Recreation failed");
                        report.failed += 1;
                    }
                },
                RecoveryPolicy::Remove => {
                    if self.forget_vanished(&record.session_id, unit).await? {
                        report.reclaimed += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
            }
        }

        if report.status == SweepStatus::Completed {
            self.remove_stale_creations(now, &mut report).await?;
        }

        if report.changed_anything() || report.failed > 0 {
            info!(
                recreated = report.recreated,
                reclaimed = report.reclaimed,
                stale_removed = report.stale_removed,
                failed = report.failed,
                "Reconciliation sweep finished"
            );
        } else {
            debug!(examined = report.examined, "Reconciliation sweep finished");
        }

        Ok(report)
    }

    /// Provisions a new unit for a READY session whose unit vanished
    ///
    /// Follows the normal creation path: reservation, CREATING under a new
    /// attempt, provision, READY. Returns false if another path got there
    /// first.
    ///
    /// A retryable provisioner failure puts the original record back so the
    /// next cycle tries again; a permanent one removes the session.
    async fn recreate(&self, record: SessionRecord, vanished: UnitRef) -> Result<bool, SessionError> {
        let session_id = record.session_id.clone();

        let token = match self.lock.acquire(&session_id, self.config.lock_ttl).await? {
            Acquisition::Acquired(token) => token,
            Acquisition::AlreadyHeld => return Ok(false),
        };

        let attempt = AttemptId::generate();
        let recreating = record.clone().into_recreating(attempt);

        match self
            .store
            .put(recreating.clone(), Precondition::ReadyUnit(vanished))
            .await
        {
            Ok(WriteOutcome::Applied) => {}
            Ok(_) => {
                self.release_lock(&session_id, token).await;
                self.metrics.record_sweep_conflict();
                return Ok(false);
            }
            Err(e) => {
                self.release_lock(&session_id, token).await;
                return Err(e.into());
            }
        }

        let result = match self.create_unit(&session_id, attempt).await {
            Ok(unit) => self.complete_creation(recreating, attempt, unit).await,
            Err(e) => Err(self.abandon_recreation(record, attempt, e).await),
        };
        self.release_lock(&session_id, token).await;

        let unit = result?;
        info!(session_id = %session_id, unit_ref = %unit, "Session recreated on a new unit");
        self.metrics.record_recreation();
        Ok(true)
    }

    /// Undoes the CREATING write of a recreation whose unit was never made
    async fn abandon_recreation(
        &self,
        original: SessionRecord,
        attempt: AttemptId,
        error: ProvisionerError,
    ) -> SessionError {
        let session_id = original.session_id.clone();
        self.metrics.record_creation_failure();

        if error.is_transient() {
            match self.store.put(original, Precondition::Attempt(attempt)).await {
                Ok(WriteOutcome::Applied) => {
                    warn!(session_id = %session_id, error = %error, "Recreation failed, will retry next cycle");
                }
                Ok(_) => debug!(session_id = %session_id, "Recreation superseded before restore"),
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Could not restore record after failed recreation")
                }
            }
            return SessionError::ProvisionerUnavailable(error);
        }

        warn!(session_id = %session_id, error = %error, "Recreation failed permanently, removing session");
        match self.store.delete(&session_id, Precondition::Attempt(attempt)).await {
            Ok(WriteOutcome::Applied) => {
                info!(session_id = %session_id, reason = DeletionReason::Reconciliation.as_str(), "Session removed");
                self.metrics.record_deletion(DeletionReason::Reconciliation);
            }
            Ok(_) => debug!(session_id = %session_id, "Recreation superseded before removal"),
            Err(e) => warn!(session_id = %session_id, error = %e, "Removal failed; stale record left for reconciliation"),
        }
        SessionError::CreationFailed {
            session_id,
            reason: error.to_string(),
        }
    }

    /// Drops a READY session whose unit vanished
    async fn forget_vanished(&self, session_id: &str, vanished: UnitRef) -> Result<bool, SessionError> {
        match self
            .store
            .delete(session_id, Precondition::ReadyUnit(vanished))
            .await?
        {
            WriteOutcome::Applied => {
                info!(session_id, reason = DeletionReason::Reconciliation.as_str(), "Session removed");
                self.metrics.record_deletion(DeletionReason::Reconciliation);
                Ok(true)
            }
            _ => {
                self.metrics.record_sweep_conflict();
                Ok(false)
            }
        }
    }

    /// Removes CREATING records whose creator is gone
    ///
    /// A record qualifies once it is older than the creation timeout plus
    /// the lock TTL and no reservation is held for it.
    async fn remove_stale_creations(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<(), SessionError> {
        let stale_before = now - chrono_duration(self.config.creation_timeout + self.config.lock_ttl);

        let mut creating = scan_records(
            self.store.clone(),
            ScanFilter::Status(SessionStatus::Creating),
            self.config.scan_page_size,
            None,
        );
        while let Some(record) = creating.next().await {
            let record = record?;
            if record.created_at >= stale_before || self.lock.is_held(&record.session_id).await? {
                continue;
            }
            report.examined += 1;

            if !self.leadership.is_leader() {
                report.status = SweepStatus::LeadershipLost;
                break;
            }

            let precondition = match record.creation_attempt_id {
                Some(attempt) => Precondition::Attempt(attempt),
                None => Precondition::Status(SessionStatus::Creating),
            };
            match self.store.delete(&record.session_id, precondition).await? {
                WriteOutcome::Applied => {
                    warn!(session_id = %record.session_id, "Removed abandoned CREATING record");
                    report.stale_removed += 1;
                }
                _ => report.skipped += 1,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::tests::{harness, test_config, Harness};

    async fn leading(config: EngineConfig) -> Harness {
        let h = harness(config);
        assert!(h.engine.leadership().tick().await.unwrap());
        h
    }

    #[tokio::test]
    async fn test_idle_session_is_reclaimed_and_recreated_fresh() {
        let h = leading(test_config()).await;
        let t0 = Utc::now();

        let first = h.engine.resolve_or_create_at("abc", t0).await.unwrap();

        let report = h
            .engine
            .run_idle_sweep_at(t0 + ChronoDuration::seconds(601))
            .await
            .unwrap();
        assert_eq!(report.status, SweepStatus::Completed);
        assert_eq!(report.reclaimed, 1);
        assert!(h.store.get("abc").await.unwrap().is_none());
        assert!(!h.provisioner.has_unit(&first));

        let second = h
            .engine
            .resolve_or_create_at("abc", t0 + ChronoDuration::seconds(602))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(h.engine.metrics().snapshot().deletions_idle, 1);
    }

    #[tokio::test]
    async fn test_active_session_survives() {
        let h = leading(test_config()).await;
        let t0 = Utc::now();

        h.engine.resolve_or_create_at("abc", t0).await.unwrap();
        h.engine
            .touch_at("abc", t0 + ChronoDuration::seconds(300))
            .await
            .unwrap();

        let report = h
            .engine
            .run_idle_sweep_at(t0 + ChronoDuration::seconds(601))
            .await
            .unwrap();
        assert_eq!(report.reclaimed, 0);
        assert_eq!(h.store.get("abc").await.unwrap().unwrap().status, SessionStatus::Ready);
        assert_eq!(h.provisioner.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_followers_do_not_sweep() {
        let h = harness(test_config());
        let t0 = Utc::now();
        h.engine.resolve_or_create_at("abc", t0).await.unwrap();

        let later = t0 + ChronoDuration::seconds(601);
        let idle = h.engine.run_idle_sweep_at(later).await.unwrap();
        let reconcile = h.engine.run_reconciliation_sweep_at(later).await.unwrap();

        assert_eq!(idle.status, SweepStatus::NotLeader);
        assert_eq!(reconcile.status, SweepStatus::NotLeader);
        assert!(h.store.get("abc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let h = leading(test_config()).await;

        let _running = h.engine.idle_sweep_running.lock().await;
        let report = h.engine.run_idle_sweep().await.unwrap();
        assert_eq!(report.status, SweepStatus::AlreadyRunning);
    }

    #[tokio::test]
    async fn test_failed_unit_delete_is_retried_next_cycle() {
        let h = leading(test_config()).await;
        let t0 = Utc::now();
        let unit = h.engine.resolve_or_create_at("abc", t0).await.unwrap();

        h.provisioner
            .fail_next_delete(ProvisionerError::Transient("503".to_string()));
        let first_sweep = t0 + ChronoDuration::seconds(601);
        let report = h.engine.run_idle_sweep_at(first_sweep).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(h.store.get("abc").await.unwrap().unwrap().status, SessionStatus::Deleting);

        // Not yet past one extra interval
        let report = h
            .engine
            .run_idle_sweep_at(first_sweep + ChronoDuration::seconds(30))
            .await
            .unwrap();
        assert_eq!(report.retried, 0);

        let report = h
            .engine
            .run_idle_sweep_at(first_sweep + ChronoDuration::seconds(61))
            .await
            .unwrap();
        assert_eq!(report.retried, 1);
        assert!(h.store.get("abc").await.unwrap().is_none());
        assert!(!h.provisioner.has_unit(&unit));
    }

    #[tokio::test]
    async fn test_vanished_unit_is_recreated() {
        let h = leading(test_config()).await;
        let first = h.engine.resolve_or_create("abc").await.unwrap();
        h.provisioner.remove_unit_externally(&first);

        let report = h.engine.run_reconciliation_sweep().await.unwrap();
        assert_eq!(report.recreated, 1);

        let record = h.store.get("abc").await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Ready);
        let second = record.unit_ref.unwrap();
        assert_ne!(second, first);
        assert!(h.provisioner.has_unit(&second));
        assert_eq!(h.engine.resolve_or_create("abc").await.unwrap(), second);
        assert_eq!(h.engine.metrics().snapshot().recreations, 1);
    }

    #[tokio::test]
    async fn test_idle_reclaim_skips_a_session_recreated_since_the_scan() {
        let h = leading(test_config()).await;
        let t0 = Utc::now();
        let first = h.engine.resolve_or_create_at("abc", t0).await.unwrap();
        let scanned = h.store.get("abc").await.unwrap().unwrap();

        // Reconciliation moves the session to a new unit after the idle scan read it
        h.provisioner.remove_unit_externally(&first);
        let report = h.engine.run_reconciliation_sweep_at(t0).await.unwrap();
        assert_eq!(report.recreated, 1);
        let second = h.store.get("abc").await.unwrap().unwrap().unit_ref.unwrap();

        let later = t0 + ChronoDuration::seconds(601);
        let cutoff = later - chrono_duration(h.engine.config.idle_timeout);
        assert!(!h.engine.reclaim_if_idle(scanned, cutoff, later).await.unwrap());

        let record = h.store.get("abc").await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Ready);
        assert_eq!(record.ready_unit(), Some(&second));
        assert!(h.provisioner.has_unit(&second));
        assert_eq!(h.provisioner.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_recreation_failure_keeps_the_session() {
        let h = leading(test_config()).await;
        let first = h.engine.resolve_or_create("abc").await.unwrap();
        h.provisioner.remove_unit_externally(&first);
        h.provisioner
            .fail_next_create(ProvisionerError::Transient("503".to_string()));

        let report = h.engine.run_reconciliation_sweep().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.recreated, 0);

        let record = h.store.get("abc").await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Ready);
        assert_eq!(record.ready_unit(), Some(&first));
        assert_eq!(h.engine.metrics().snapshot().deletions_reconciliation, 0);

        // The next cycle sees the vanished unit again and succeeds
        let report = h.engine.run_reconciliation_sweep().await.unwrap();
        assert_eq!(report.recreated, 1);
        let second = h.store.get("abc").await.unwrap().unwrap().unit_ref.unwrap();
        assert_ne!(second, first);
        assert!(h.provisioner.has_unit(&second));
    }

    #[tokio::test]
    async fn test_permanent_recreation_failure_removes_the_session() {
        let h = leading(test_config()).await;
        let first = h.engine.resolve_or_create("abc").await.unwrap();
        h.provisioner.remove_unit_externally(&first);
        h.provisioner
            .fail_next_create(ProvisionerError::Permanent("image not found".to_string()));

        let report = h.engine.run_reconciliation_sweep().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(h.store.get("abc").await.unwrap().is_none());
        assert!(!h.lock.is_held("abc").await.unwrap());
        assert_eq!(h.engine.metrics().snapshot().deletions_reconciliation, 1);
    }

    #[tokio::test]
    async fn test_vanished_unit_is_forgotten_under_remove_policy() {
        let config = EngineConfig {
            recovery_policy: RecoveryPolicy::Remove,
            ..test_config()
        };
        let h = leading(config).await;
        let first = h.engine.resolve_or_create("abc").await.unwrap();
        h.provisioner.remove_unit_externally(&first);

        let report = h.engine.run_reconciliation_sweep().await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert!(h.store.get("abc").await.unwrap().is_none());
        assert_eq!(h.engine.metrics().snapshot().deletions_reconciliation, 1);
        assert_eq!(h.provisioner.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_describe_failure_leaves_session_alone() {
        let h = leading(test_config()).await;
        let unit = h.engine.resolve_or_create("abc").await.unwrap();
        h.provisioner
            .fail_next_describe(ProvisionerError::Transient("throttled".to_string()));

        let report = h.engine.run_reconciliation_sweep().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.recreated, 0);
        assert_eq!(h.store.get("abc").await.unwrap().unwrap().unit_ref, Some(unit));
    }

    #[tokio::test]
    async fn test_abandoned_creation_is_removed() {
        let h = leading(test_config()).await;
        let now = Utc::now();
        let long_ago = now - ChronoDuration::seconds(3600);

        h.store
            .put(
                SessionRecord::creating("crashed", AttemptId::generate(), long_ago),
                Precondition::Unconditional,
            )
            .await
            .unwrap();
        h.store
            .put(
                SessionRecord::creating("in-flight", AttemptId::generate(), long_ago),
                Precondition::Unconditional,
            )
            .await
            .unwrap();
        h.lock
            .acquire("in-flight", Duration::from_secs(30))
            .await
            .unwrap();

        let report = h.engine.run_reconciliation_sweep_at(now).await.unwrap();
        assert_eq!(report.stale_removed, 1);
        assert!(h.store.get("crashed").await.unwrap().is_none());
        assert!(h.store.get("in-flight").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_outage_fails_the_cycle() {
        let h = leading(test_config()).await;
        h.engine.resolve_or_create("abc").await.unwrap();
        h.store.set_available(false);

        let result = h.engine.run_idle_sweep().await;
        assert!(matches!(result, Err(SessionError::StoreUnavailable(_))));

        h.store.set_available(true);
        assert_eq!(h.provisioner.delete_calls(), 0);
    }
}
