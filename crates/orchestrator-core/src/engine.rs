//! Lifecycle engine: the request path
//!
//! `resolve_or_create` runs on every replica. Its exclusion comes from the
//! per-session reservation lock plus conditional writes fenced on the
//! creation attempt, never from leadership. The leader-only sweeps live in
//! [`crate::sweeps`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use common::error::{ProvisionerError, SessionError};
use common::models::{AttemptId, SessionRecord, SessionStatus, UnitRef};
use common::types::DeletionReason;
use common::utils::{format_duration, Backoff};
use storage_adapter::{Acquisition, LockToken, Precondition, ReservationLock, SessionStore, WriteOutcome};
use unit_provisioner::{TimeoutProvisioner, UnitProvisioner};

use crate::config::EngineConfig;
use crate::coordinator::LeadershipCoordinator;
use crate::metrics::SessionMetrics;

/// Outcome of one attempt to start a creation
enum CreateAttempt {
    /// This call created the unit
    Created(UnitRef),
    /// Another caller holds the reservation
    Contended,
    /// A record appeared since it was read; resolve again
    Raced,
}

/// The lifecycle engine
///
/// Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct LifecycleEngine {
    /// Session store
    pub(crate) store: Arc<dyn SessionStore>,

    /// Per-session reservation lock
    pub(crate) lock: Arc<dyn ReservationLock>,

    /// Unit provisioner, bounded by the per-call timeout
    pub(crate) provisioner: Arc<dyn UnitProvisioner>,

    /// Leadership of this replica
    pub(crate) leadership: Arc<LeadershipCoordinator>,

    /// Counters
    pub(crate) metrics: Arc<SessionMetrics>,

    /// Tunables
    pub(crate) config: Arc<EngineConfig>,

    /// Held while an idle sweep runs
    pub(crate) idle_sweep_running: Arc<Mutex<()>>,

    /// Held while a reconciliation sweep runs
    pub(crate) reconcile_running: Arc<Mutex<()>>,
}

impl LifecycleEngine {
    /// Creates a new engine
    ///
    /// Every provisioner call is bounded by `config.provisioner_timeout`.
    pub fn new(
        store: Arc<dyn SessionStore>,
        lock: Arc<dyn ReservationLock>,
        provisioner: Arc<dyn UnitProvisioner>,
        leadership: Arc<LeadershipCoordinator>,
        metrics: Arc<SessionMetrics>,
        config: EngineConfig,
    ) -> Self {
        let provisioner: Arc<dyn UnitProvisioner> =
            Arc::new(TimeoutProvisioner::new(provisioner, config.provisioner_timeout));

        Self {
            store,
            lock,
            provisioner,
            leadership,
            metrics,
            config: Arc::new(config),
            idle_sweep_running: Arc::new(Mutex::new(())),
            reconcile_running: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    pub fn leadership(&self) -> &Arc<LeadershipCoordinator> {
        &self.leadership
    }

    /// Returns the unit serving `session_id`, creating it if needed
    ///
    /// Blocks for at most the creation timeout while a unit is provisioned
    /// by this call or by a concurrent one.
    pub async fn resolve_or_create(&self, session_id: &str) -> Result<UnitRef, SessionError> {
        self.resolve_or_create_at(session_id, Utc::now()).await
    }

    /// [`Self::resolve_or_create`] with an explicit activity timestamp
    pub async fn resolve_or_create_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<UnitRef, SessionError> {
        let started = Instant::now();
        let deadline = started + self.config.creation_timeout;
        let mut backoff = Backoff::new(self.config.poll_initial, self.config.poll_max);

        loop {
            if Instant::now() >= deadline {
                return Err(self.creation_timeout(session_id, started));
            }

            match self.store.get(session_id).await? {
                Some(record) => match record.status {
                    SessionStatus::Ready => {
                        if let Some(unit) = record.unit_ref {
                            self.store.touch(session_id, now).await?;
                            return Ok(unit);
                        }
                        // READY without a unit breaks the record invariant; treat as in flight
                        error!(session_id, "READY record without unit_ref");
                        self.sleep_until_next_poll(&mut backoff, deadline).await;
                    }
                    SessionStatus::Creating => {
                        if let Some(unit) = self.await_creation(session_id, now, started, deadline, &mut backoff).await? {
                            return Ok(unit);
                        }
                    }
                    SessionStatus::Deleting => {
                        // Wait for the removal, then start a fresh record
                        debug!(session_id, "Session is being deleted, waiting before recreating");
                        self.sleep_until_next_poll(&mut backoff, deadline).await;
                    }
                },
                None => match self.try_create(session_id, now).await? {
                    CreateAttempt::Created(unit) => return Ok(unit),
                    CreateAttempt::Contended => {
                        if let Some(unit) = self.await_creation(session_id, now, started, deadline, &mut backoff).await? {
                            return Ok(unit);
                        }
                    }
                    CreateAttempt::Raced => {}
                },
            }
        }
    }

    /// Starts a creation for an absent session
    async fn try_create(&self, session_id: &str, now: DateTime<Utc>) -> Result<CreateAttempt, SessionError> {
        let ceiling = self.config.concurrency_ceiling;

        // Cheap pre-check; nothing is locked or provisioned when full
        let live = self.store.count_live().await?;
        if live >= ceiling {
            return Err(self.admission_rejected(session_id, live));
        }

        let token = match self.lock.acquire(session_id, self.config.lock_ttl).await? {
            Acquisition::Acquired(token) => token,
            Acquisition::AlreadyHeld => {
                debug!(session_id, "Creation already in flight elsewhere");
                return Ok(CreateAttempt::Contended);
            }
        };

        let attempt = AttemptId::generate();
        let record = SessionRecord::creating(session_id, attempt, now);

        // The insert re-checks the ceiling atomically so racing creators cannot overshoot it
        let outcome = self
            .store
            .put(record.clone(), Precondition::Absent { live_ceiling: Some(ceiling) })
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.release_lock(session_id, token).await;
                return Err(e.into());
            }
        };

        match outcome {
            WriteOutcome::Applied => {}
            WriteOutcome::AtCapacity => {
                self.release_lock(session_id, token).await;
                return Err(self.admission_rejected(session_id, ceiling));
            }
            WriteOutcome::Conflict => {
                self.release_lock(session_id, token).await;
                return Ok(CreateAttempt::Raced);
            }
        }

        info!(session_id, attempt = %attempt, "Creating session unit");

        // Run the creation detached so a caller that gives up does not strand the reservation
        let engine = self.clone();
        let id = session_id.to_string();
        let creation = tokio::spawn(async move {
            let result = engine.provision(record, attempt).await;
            engine.release_lock(&id, token).await;
            result
        });

        match creation.await {
            Ok(result) => result.map(CreateAttempt::Created),
            Err(e) => Err(SessionError::CreationFailed {
                session_id: session_id.to_string(),
                reason: format!("creation task aborted: {}", e),
            }),
        }
    }

    /// Provisions the unit for a CREATING record written under `attempt`
    ///
    /// On success the record becomes READY; on any failure the record is
    /// rolled back and no unit is left behind.
    pub(crate) async fn provision(&self, record: SessionRecord, attempt: AttemptId) -> Result<UnitRef, SessionError> {
        let session_id = record.session_id.clone();

        let unit = match self.create_unit(&session_id, attempt).await {
            Ok(unit) => unit,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Unit creation failed, rolling back");
                self.rollback(&session_id, attempt).await;
                self.metrics.record_creation_failure();
                return Err(SessionError::CreationFailed {
                    session_id,
                    reason: e.to_string(),
                });
            }
        };

        self.complete_creation(record, attempt, unit).await
    }

    pub(crate) async fn create_unit(&self, session_id: &str, attempt: AttemptId) -> Result<UnitRef, ProvisionerError> {
        self.provisioner.create(session_id, attempt, &self.config.template).await
    }

    /// Publishes `unit` as the READY unit of the record written under `attempt`
    pub(crate) async fn complete_creation(
        &self,
        record: SessionRecord,
        attempt: AttemptId,
        unit: UnitRef,
    ) -> Result<UnitRef, SessionError> {
        let session_id = record.session_id.clone();

        let completed = self
            .store
            .put(record.into_ready(unit.clone()), Precondition::Attempt(attempt))
            .await;

        match completed {
            Ok(WriteOutcome::Applied) => {
                info!(session_id = %session_id, unit_ref = %unit, "Session ready");
                self.metrics.record_creation_success();
                Ok(unit)
            }
            Ok(_) => {
                // Superseded (the record was rolled back or recreated by someone else)
                if self.routes_to(&session_id, &unit).await {
                    warn!(session_id = %session_id, unit_ref = %unit, "Creation superseded by a record using this unit, keeping it");
                } else {
                    warn!(session_id = %session_id, unit_ref = %unit, "Creation superseded, deleting unit");
                    self.discard_unit(&session_id, &unit).await;
                }
                self.metrics.record_creation_failure();
                Err(SessionError::CreationFailed {
                    session_id,
                    reason: "creation attempt superseded".to_string(),
                })
            }
            Err(e) => {
                error!(session_id = %session_id, unit_ref = %unit, error = %e, "Failed to record created unit");
                self.discard_unit(&session_id, &unit).await;
                self.rollback(&session_id, attempt).await;
                self.metrics.record_creation_failure();
                Err(e.into())
            }
        }
    }

    /// Whether the stored record currently routes to `unit`
    ///
    /// An unreadable store counts as routing: a leaked unit is preferable to
    /// tearing down one a session may be using.
    async fn routes_to(&self, session_id: &str, unit: &UnitRef) -> bool {
        match self.store.get(session_id).await {
            Ok(Some(record)) => record.ready_unit() == Some(unit),
            Ok(None) => false,
            Err(e) => {
                warn!(session_id, error = %e, "Could not check the current unit");
                true
            }
        }
    }

    /// Removes the CREATING record of `attempt`, if it is still there
    async fn rollback(&self, session_id: &str, attempt: AttemptId) {
        match self.store.delete(session_id, Precondition::Attempt(attempt)).await {
            Ok(WriteOutcome::Applied) => debug!(session_id, "Creation rolled back"),
            Ok(_) => debug!(session_id, "Nothing to roll back"),
            Err(e) => warn!(session_id, error = %e, "Rollback failed; stale record left for reconciliation"),
        }
    }

    /// Compensating delete of a unit nobody will route to
    async fn discard_unit(&self, session_id: &str, unit: &UnitRef) {
        if let Err(e) = self.provisioner.delete(unit).await {
            error!(session_id, unit_ref = %unit, error = %e, "Compensating unit delete failed");
        }
    }

    /// Polls until the in-flight creation completes
    ///
    /// Returns `None` when the caller should resolve again (the record went
    /// away before this waiter ever saw it, or is being deleted).
    async fn await_creation(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        started: Instant,
        deadline: Instant,
        backoff: &mut Backoff,
    ) -> Result<Option<UnitRef>, SessionError> {
        let mut seen_creating = false;

        loop {
            match self.store.get(session_id).await? {
                Some(record) => match record.status {
                    SessionStatus::Ready => {
                        if let Some(unit) = record.unit_ref {
                            self.store.touch(session_id, now).await?;
                            return Ok(Some(unit));
                        }
                    }
                    SessionStatus::Creating => seen_creating = true,
                    SessionStatus::Deleting => return Ok(None),
                },
                None => {
                    if !self.lock.is_held(session_id).await? {
                        if seen_creating {
                            return Err(SessionError::CreationFailed {
                                session_id: session_id.to_string(),
                                reason: "creation was rolled back".to_string(),
                            });
                        }
                        return Ok(None);
                    }
                    // Reservation taken but record not yet written
                }
            }

            if Instant::now() >= deadline {
                return Err(self.creation_timeout(session_id, started));
            }
            self.sleep_until_next_poll(backoff, deadline).await;
        }
    }

    async fn sleep_until_next_poll(&self, backoff: &mut Backoff, deadline: Instant) {
        let delay = backoff.next_delay();
        let wake = (Instant::now() + delay).min(deadline);
        tokio::time::sleep_until(wake).await;
    }

    pub(crate) async fn release_lock(&self, session_id: &str, token: LockToken) {
        match self.lock.release(session_id, token).await {
            Ok(true) => {}
            Ok(false) => warn!(session_id, "Reservation expired before release"),
            Err(e) => warn!(session_id, error = %e, "Failed to release reservation; it will expire"),
        }
    }

    fn admission_rejected(&self, session_id: &str, live: usize) -> SessionError {
        let ceiling = self.config.concurrency_ceiling;
        info!(session_id, live, ceiling, "Admission rejected");
        self.metrics.record_admission_rejection();
        SessionError::AdmissionRejected { live, ceiling }
    }

    fn creation_timeout(&self, session_id: &str, started: Instant) -> SessionError {
        let waited = started.elapsed();
        warn!(session_id, waited = %format_duration(waited), "Timed out waiting for session unit");
        SessionError::CreationTimeout {
            session_id: session_id.to_string(),
            waited,
        }
    }

    /// Records activity on a session; never creates one
    ///
    /// Returns false if the session is unknown.
    pub async fn touch(&self, session_id: &str) -> Result<bool, SessionError> {
        self.touch_at(session_id, Utc::now()).await
    }

    pub async fn touch_at(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool, SessionError> {
        let updated = self.store.touch(session_id, at).await?;
        if !updated {
            debug!(session_id, "Touch ignored");
        }
        Ok(updated)
    }

    /// Snapshot of a session's record
    pub async fn session_status(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.store.get(session_id).await?)
    }

    /// Deletes a session and its unit on request
    ///
    /// Returns false if there was nothing to delete: the session is unknown,
    /// still being created, or was deleted concurrently.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let record = match self.store.get(session_id).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        let deleting = match record.status {
            SessionStatus::Ready => {
                let unit = match record.unit_ref.clone() {
                    Some(unit) => unit,
                    None => return Ok(false),
                };
                let deleting = record.into_deleting(Utc::now());
                match self
                    .store
                    .put(deleting.clone(), Precondition::ReadyUnit(unit))
                    .await?
                {
                    WriteOutcome::Applied => deleting,
                    _ => {
                        debug!(session_id, "Session changed before explicit delete");
                        return Ok(false);
                    }
                }
            }
            SessionStatus::Deleting => record,
            SessionStatus::Creating => {
                debug!(session_id, "Session still creating, not deleting");
                return Ok(false);
            }
        };

        self.finish_deletion(deleting, DeletionReason::Explicit).await
    }

    /// Deletes the unit of a DELETING record, then the record itself
    ///
    /// The unit delete is attempted before the record is removed; if it
    /// fails the record stays DELETING so a later sweep retries it.
    pub(crate) async fn finish_deletion(
        &self,
        record: SessionRecord,
        reason: DeletionReason,
    ) -> Result<bool, SessionError> {
        let session_id = record.session_id.as_str();

        if let Some(unit) = &record.releasing_unit {
            self.provisioner
                .delete(unit)
                .await
                .map_err(SessionError::ProvisionerUnavailable)?;
        }

        match self
            .store
            .delete(session_id, Precondition::Status(SessionStatus::Deleting))
            .await?
        {
            WriteOutcome::Applied => {
                info!(
                    session_id,
                    unit_ref = ?record.releasing_unit.as_ref().map(UnitRef::as_str),
                    reason = reason.as_str(),
                    "Session deleted"
                );
                self.metrics.record_deletion(reason);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Recounts READY sessions into the gauge
    pub async fn refresh_gauges(&self) -> Result<(), SessionError> {
        let ready = self.store.count_status(SessionStatus::Ready).await?;
        self.metrics.set_ready_sessions(ready);
        Ok(())
    }
}
