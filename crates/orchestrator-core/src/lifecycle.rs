//! Lifecycle management for one replica
//!
//! Owns the background loops (lease renewal, idle sweep, reconciliation
//! sweep) and the replica's service state. A failing dependency marks the
//! replica degraded; it keeps serving and retrying rather than exiting.

use anyhow::Result;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::LifecycleEngine;
use crate::state::OrchestratorState;

/// Lifecycle manager for the replica
pub struct LifecycleManager {
    /// Engine driven by the loops
    engine: LifecycleEngine,

    /// Current state of the replica
    state: Arc<RwLock<OrchestratorState>>,

    /// Last failure of each loop that is currently failing
    failures: Arc<parking_lot::Mutex<BTreeMap<&'static str, String>>>,

    /// Shutdown signal
    shutdown_tx: watch::Sender<bool>,

    /// Running background loops
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleManager {
    /// Creates a new lifecycle manager
    pub fn new(engine: LifecycleEngine) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            engine,
            state: Arc::new(RwLock::new(OrchestratorState::new())),
            failures: Arc::new(parking_lot::Mutex::new(BTreeMap::new())),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    /// Current state
    pub async fn state(&self) -> OrchestratorState {
        self.state.read().await.clone()
    }

    /// Starts the background loops
    pub async fn start(&self) -> Result<()> {
        info!("Starting lifecycle manager");

        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Lifecycle manager already started");
            return Ok(());
        }
        self.shutdown_tx.send_replace(false);

        let config = self.engine.config().clone();

        // Lease first, so the sweeps find leadership settled on their first tick.
        // Gauges ride along on every replica, leader or not.
        let engine = self.engine.clone();
        tasks.push(self.spawn_loop("lease", config.lease_renew_interval, move || {
            let engine = engine.clone();
            async move {
                engine
                    .leadership()
                    .tick()
                    .await
                    .map_err(|e| format!("lease store unavailable: {}", e))?;
                engine
                    .refresh_gauges()
                    .await
                    .map_err(|e| format!("gauge refresh failed: {}", e))
            }
        }));

        let engine = self.engine.clone();
        tasks.push(self.spawn_loop("idle sweep", config.sweep_interval, move || {
            let engine = engine.clone();
            async move {
                engine
                    .run_idle_sweep()
                    .await
                    .map(|_| ())
                    .map_err(|e| format!("idle sweep failed: {}", e))
            }
        }));

        let engine = self.engine.clone();
        tasks.push(self.spawn_loop("reconciliation", config.reconcile_interval, move || {
            let engine = engine.clone();
            async move {
                engine
                    .run_reconciliation_sweep()
                    .await
                    .map(|_| ())
                    .map_err(|e| format!("reconciliation sweep failed: {}", e))
            }
        }));
        drop(tasks);

        self.transition_to(OrchestratorState::Serving).await;

        info!(replica_id = %self.engine.leadership().replica_id(), "Lifecycle manager started successfully");

        Ok(())
    }

    /// Stops the loops and hands leadership over
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping lifecycle manager");
        self.transition_to(OrchestratorState::Stopping).await;

        self.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background loop ended abnormally: {}", e);
            }
        }

        if let Err(e) = self.engine.leadership().step_down().await {
            warn!("Failed to release leader lease, it will expire: {}", e);
        }

        self.transition_to(OrchestratorState::Stopped).await;
        info!("Lifecycle manager stopped successfully");

        Ok(())
    }

    /// Runs `cycle` every `period` until shutdown
    ///
    /// Cycles never overlap: a cycle that overruns its period delays the
    /// next tick instead of stacking up.
    fn spawn_loop<F, Fut>(&self, name: &'static str, period: Duration, mut cycle: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), String>> + Send + 'static,
    {
        let state = self.state.clone();
        let failures = self.failures.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let outcome = cycle().await;
                let degraded = {
                    let mut failures = failures.lock();
                    match outcome {
                        Ok(()) => {
                            failures.remove(name);
                        }
                        Err(reason) => {
                            warn!("{}", reason);
                            failures.insert(name, reason);
                        }
                    }
                    if failures.is_empty() {
                        None
                    } else {
                        Some(failures.values().cloned().collect::<Vec<_>>().join("; "))
                    }
                };
                Self::apply_health(&state, degraded).await;
            }

            debug!("{} loop stopped", name);
        })
    }

    /// Transitions to a new state
    pub async fn transition_to(&self, new_state: OrchestratorState) {
        let mut state = self.state.write().await;
        if *state != new_state {
            info!("State transition: {} -> {}", *state, new_state);
            *state = new_state;
        }
    }

    /// Moves between Serving and Degraded; other states are left alone
    async fn apply_health(state: &Arc<RwLock<OrchestratorState>>, degraded: Option<String>) {
        let mut state = state.write().await;
        if !state.is_serving() {
            return;
        }
        match degraded {
            Some(reason) => {
                if state.degraded_reason() != Some(reason.as_str()) {
                    error!("Replica degraded: {}", reason);
                    *state = OrchestratorState::Degraded(reason);
                }
            }
            None => {
                if state.is_degraded() {
                    info!("Replica recovered from degraded state");
                    *state = OrchestratorState::Serving;
                }
            }
        }
    }
}
