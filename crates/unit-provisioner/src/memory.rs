//! In-process provisioner
//!
//! Keeps units in a map instead of talking to a compute API. Used by the
//! `memory` provisioner kind and as the provisioner double in tests, so it
//! supports injected latency and failures and counts every call.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use common::error::ProvisionerError;
use common::models::{AttemptId, ResourceTemplate, UnitRef};
use common::types::UnitPresence;

use crate::UnitProvisioner;

/// In-memory provisioner
pub struct InMemoryProvisioner {
    /// Running units and the creation attempt that made them
    units: DashMap<UnitRef, (String, AttemptId)>,

    /// Running unit per session and attempt
    by_attempt: DashMap<(String, AttemptId), UnitRef>,

    /// Source of unit identifiers
    next_unit: AtomicU64,

    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    describe_calls: AtomicUsize,

    /// Latency added to every call
    delay: Mutex<Duration>,

    /// Failure returned by the next create call
    create_failure: Mutex<Option<ProvisionerError>>,

    /// Failure returned by the next delete call
    delete_failure: Mutex<Option<ProvisionerError>>,

    /// Failure returned by the next describe call
    describe_failure: Mutex<Option<ProvisionerError>>,
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self {
            units: DashMap::new(),
            by_attempt: DashMap::new(),
            next_unit: AtomicU64::new(1),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            describe_calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            create_failure: Mutex::new(None),
            delete_failure: Mutex::new(None),
            describe_failure: Mutex::new(None),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fail_next_create(&self, error: ProvisionerError) {
        *self.create_failure.lock() = Some(error);
    }

    pub fn fail_next_delete(&self, error: ProvisionerError) {
        *self.delete_failure.lock() = Some(error);
    }

    pub fn fail_next_describe(&self, error: ProvisionerError) {
        *self.describe_failure.lock() = Some(error);
    }

    /// Removes a unit behind the orchestrator's back
    pub fn remove_unit_externally(&self, unit: &UnitRef) -> bool {
        self.forget(unit)
    }

    pub fn has_unit(&self, unit: &UnitRef) -> bool {
        self.units.contains_key(unit)
    }

    /// Number of running units
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn forget(&self, unit: &UnitRef) -> bool {
        match self.units.remove(unit) {
            Some((_, key)) => {
                self.by_attempt.remove_if(&key, |_, current| current == unit);
                true
            }
            None => false,
        }
    }
}

impl Default for InMemoryProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnitProvisioner for InMemoryProvisioner {
    async fn create(
        &self,
        session_id: &str,
        attempt: AttemptId,
        _template: &ResourceTemplate,
    ) -> Result<UnitRef, ProvisionerError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(error) = self.create_failure.lock().take() {
            return Err(error);
        }

        let key = (session_id.to_string(), attempt);
        let unit = match self.by_attempt.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let unit = UnitRef::new(format!("unit-{}", self.next_unit.fetch_add(1, Ordering::SeqCst)));
                self.units.insert(unit.clone(), key);
                entry.insert(unit.clone());
                debug!(session_id, unit_ref = %unit, "Unit created");
                unit
            }
        };

        Ok(unit)
    }

    async fn delete(&self, unit: &UnitRef) -> Result<(), ProvisionerError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(error) = self.delete_failure.lock().take() {
            return Err(error);
        }

        if self.forget(unit) {
            debug!(unit_ref = %unit, "Unit deleted");
        }
        Ok(())
    }

    async fn describe(&self, unit: &UnitRef) -> Result<UnitPresence, ProvisionerError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(error) = self.describe_failure.lock().take() {
            return Err(error);
        }

        Ok(if self.units.contains_key(unit) {
            UnitPresence::Present
        } else {
            UnitPresence::Absent
        })
    }
}
