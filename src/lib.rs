//! Main integration module for the session orchestrator
//!
//! This module wires the configured backends into the lifecycle engine,
//! the background lifecycle manager and the HTTP router.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use api_gateway::ApiState;
use orchestrator_config::{ConfigManager, OrchestratorSettings, ProvisionerKind};
use orchestrator_core::{
    EngineConfig, LeadershipCoordinator, LifecycleEngine, LifecycleManager, OrchestratorState, SessionMetrics,
};
use storage_adapter::{
    InMemoryLeaseStore, InMemoryReservationLock, InMemorySessionStore, LeaseStore, ReservationLock, SessionStore,
};
use unit_provisioner::{HttpProvisioner, InMemoryProvisioner, UnitProvisioner};

/// Shared state backends of a replica
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn SessionStore>,
    pub lock: Arc<dyn ReservationLock>,
    pub leases: Arc<dyn LeaseStore>,
    pub provisioner: Arc<dyn UnitProvisioner>,
}

impl Backends {
    /// Process-local store, lock and lease, with the configured provisioner
    ///
    /// Replicas built this way share nothing, so only one should run.
    pub fn local(settings: &OrchestratorSettings) -> Result<Self> {
        Ok(Self {
            store: Arc::new(InMemorySessionStore::new()),
            lock: Arc::new(InMemoryReservationLock::new()),
            leases: Arc::new(InMemoryLeaseStore::new()),
            provisioner: build_provisioner(settings)?,
        })
    }
}

/// Builds the provisioner selected by `provisioner.kind`
pub fn build_provisioner(settings: &OrchestratorSettings) -> Result<Arc<dyn UnitProvisioner>> {
    match settings.provisioner.kind {
        ProvisionerKind::Memory => {
            warn!("Using the in-memory provisioner; no real units will be created");
            Ok(Arc::new(InMemoryProvisioner::new()))
        }
        ProvisionerKind::Http => {
            let endpoint = settings
                .provisioner
                .endpoint
                .clone()
                .context("provisioner.endpoint is required for the http provisioner")?;
            info!("Using the HTTP provisioner at {}", endpoint);
            let provisioner = HttpProvisioner::new(endpoint, settings.provisioner_timeout())
                .context("failed to build HTTP provisioner")?;
            Ok(Arc::new(provisioner))
        }
    }
}

/// One orchestrator replica
pub struct SessionOrchestrator {
    /// Configuration manager
    config_manager: Arc<ConfigManager>,

    /// Background loops and service state
    lifecycle: Arc<LifecycleManager>,
}

impl SessionOrchestrator {
    /// Creates a replica on process-local backends
    pub fn new(config_manager: Arc<ConfigManager>) -> Result<Self> {
        let backends = Backends::local(config_manager.settings())?;
        Self::with_backends(config_manager, backends)
    }

    /// Creates a replica on the given backends
    pub fn with_backends(config_manager: Arc<ConfigManager>, backends: Backends) -> Result<Self> {
        let settings = config_manager.settings();

        let replica_id = settings
            .replica_id
            .clone()
            .unwrap_or_else(|| format!("sessiond-{}", uuid::Uuid::new_v4()));
        info!(replica_id = %replica_id, "Initializing session orchestrator");

        let config = EngineConfig::from(settings);
        let leadership = Arc::new(LeadershipCoordinator::new(
            replica_id,
            backends.leases,
            config.lease_ttl,
        ));

        let engine = LifecycleEngine::new(
            backends.store,
            backends.lock,
            backends.provisioner,
            leadership,
            Arc::new(SessionMetrics::new()),
            config,
        );

        Ok(Self {
            config_manager,
            lifecycle: Arc::new(LifecycleManager::new(engine)),
        })
    }

    /// Starts the background loops
    pub async fn start(&self) -> Result<()> {
        info!("Starting session orchestrator");
        self.lifecycle.start().await
    }

    /// Stops the background loops and releases leadership
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping session orchestrator");
        self.lifecycle.stop().await
    }

    /// HTTP API of this replica
    pub fn router(&self) -> axum::Router {
        api_gateway::router(ApiState::new(self.lifecycle.clone()))
    }

    pub async fn state(&self) -> OrchestratorState {
        self.lifecycle.state().await
    }

    pub fn engine(&self) -> &LifecycleEngine {
        self.lifecycle.engine()
    }

    pub fn config_manager(&self) -> Arc<ConfigManager> {
        self.config_manager.clone()
    }
}
