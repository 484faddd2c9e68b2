//! Typed orchestrator settings and their defaults

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use common::models::ResourceTemplate;
use common::types::RecoveryPolicy;

/// Settings recognised by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Identity of this replica in leader election; generated when unset
    pub replica_id: Option<String>,

    /// Inactivity after which a session is reclaimed
    pub idle_timeout_secs: u64,

    /// Idle sweep period
    pub sweep_interval_secs: u64,

    /// Reconciliation sweep period
    pub reconcile_interval_secs: u64,

    /// Upper bound a resolve call may wait for a unit
    pub creation_timeout_secs: u64,

    /// Per-call budget for provisioner create/delete/describe
    pub provisioner_timeout_secs: u64,

    /// Maximum number of CREATING + READY sessions
    pub concurrency_ceiling: usize,

    /// Reservation lock expiry
    pub lock_ttl_secs: u64,

    /// Leader lease expiry
    pub lease_ttl_secs: u64,

    /// How often the leader renews (and followers retry) the lease
    pub lease_renew_interval_secs: u64,

    /// Recreate units that vanished instead of dropping their sessions
    pub recreate_on_vanish: bool,

    /// First delay when polling for an in-flight creation
    pub poll_initial_ms: u64,

    /// Cap on the polling delay
    pub poll_max_ms: u64,

    /// Records fetched per store scan page
    pub scan_page_size: usize,

    /// Address of the routing-facing HTTP API
    pub listen_addr: String,

    /// Address of the Prometheus exporter, disabled when unset
    pub metrics_listen_addr: Option<String>,

    /// Unit provisioner backend
    pub provisioner: ProvisionerSettings,

    /// Logging
    pub log: LogSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            replica_id: None,
            idle_timeout_secs: 600,
            sweep_interval_secs: 60,
            reconcile_interval_secs: 300,
            creation_timeout_secs: 60,
            provisioner_timeout_secs: 30,
            concurrency_ceiling: 100,
            lock_ttl_secs: 90,
            lease_ttl_secs: 15,
            lease_renew_interval_secs: 5,
            recreate_on_vanish: true,
            poll_initial_ms: 50,
            poll_max_ms: 1000,
            scan_page_size: 100,
            listen_addr: "0.0.0.0:8000".to_string(),
            metrics_listen_addr: None,
            provisioner: ProvisionerSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn creation_timeout(&self) -> Duration {
        Duration::from_secs(self.creation_timeout_secs)
    }

    pub fn provisioner_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioner_timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn lease_renew_interval(&self) -> Duration {
        Duration::from_secs(self.lease_renew_interval_secs)
    }

    pub fn poll_initial(&self) -> Duration {
        Duration::from_millis(self.poll_initial_ms)
    }

    pub fn poll_max(&self) -> Duration {
        Duration::from_millis(self.poll_max_ms)
    }

    /// Policy applied when a READY session's unit has vanished
    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy::from_recreate_flag(self.recreate_on_vanish)
    }
}

/// Which provisioner backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionerKind {
    /// Process-local fake, for development and tests
    Memory,
    /// Remote compute API over HTTP
    Http,
}

/// Unit provisioner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerSettings {
    /// Backend kind
    pub kind: ProvisionerKind,

    /// Base URL of the compute API (required for `http`)
    pub endpoint: Option<String>,

    /// Template applied to every unit
    pub template: ResourceTemplate,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            kind: ProvisionerKind::Memory,
            endpoint: None,
            template: ResourceTemplate::default(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Directory for a daily-rolling log file, stdout only when unset
    pub directory: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}
