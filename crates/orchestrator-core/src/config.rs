//! Engine tunables derived from the loaded settings

use std::time::Duration;

use common::models::ResourceTemplate;
use common::types::RecoveryPolicy;
use orchestrator_config::OrchestratorSettings;

/// Timing, capacity and policy knobs of the lifecycle engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Inactivity after which a READY session is reclaimed
    pub idle_timeout: Duration,

    /// Idle sweep period; also the grace before a DELETING record is retried
    pub sweep_interval: Duration,

    /// Reconciliation sweep period
    pub reconcile_interval: Duration,

    /// Budget of one resolve-or-create call
    pub creation_timeout: Duration,

    /// Budget of one provisioner call
    pub provisioner_timeout: Duration,

    /// Maximum number of CREATING + READY sessions
    pub concurrency_ceiling: usize,

    /// Reservation lock expiry
    pub lock_ttl: Duration,

    /// Leader lease expiry
    pub lease_ttl: Duration,

    /// Lease renewal period
    pub lease_renew_interval: Duration,

    /// What to do when a READY session's unit vanished
    pub recovery_policy: RecoveryPolicy,

    /// First delay when polling for an in-flight creation
    pub poll_initial: Duration,

    /// Cap on the polling delay
    pub poll_max: Duration,

    /// Records per store scan page
    pub scan_page_size: usize,

    /// Template for new units
    pub template: ResourceTemplate,
}

impl From<&OrchestratorSettings> for EngineConfig {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            idle_timeout: settings.idle_timeout(),
            sweep_interval: settings.sweep_interval(),
            reconcile_interval: settings.reconcile_interval(),
            creation_timeout: settings.creation_timeout(),
            provisioner_timeout: settings.provisioner_timeout(),
            concurrency_ceiling: settings.concurrency_ceiling,
            lock_ttl: settings.lock_ttl(),
            lease_ttl: settings.lease_ttl(),
            lease_renew_interval: settings.lease_renew_interval(),
            recovery_policy: settings.recovery_policy(),
            poll_initial: settings.poll_initial(),
            poll_max: settings.poll_max(),
            scan_page_size: settings.scan_page_size,
            template: settings.provisioner.template.clone(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&OrchestratorSettings::default())
    }
}
