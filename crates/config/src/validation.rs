//! Settings validation

use thiserror::Error;
use tracing::warn;

use crate::settings::{OrchestratorSettings, ProvisionerKind};

/// A setting combination the orchestrator cannot run with
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("lease_renew_interval_secs ({renew}) must be shorter than lease_ttl_secs ({ttl})")]
    RenewNotBeforeExpiry { renew: u64, ttl: u64 },

    #[error("lock_ttl_secs ({lock_ttl}) must cover provisioner_timeout_secs ({provisioner_timeout})")]
    LockShorterThanProvisioner { lock_ttl: u64, provisioner_timeout: u64 },

    #[error("poll_initial_ms ({initial}) exceeds poll_max_ms ({max})")]
    PollBounds { initial: u64, max: u64 },

    #[error("provisioner.endpoint is required for the http provisioner")]
    MissingEndpoint,
}

/// Checks invariants between settings
pub fn validate(settings: &OrchestratorSettings) -> Result<(), ValidationError> {
    let non_zero = [
        ("idle_timeout_secs", settings.idle_timeout_secs),
        ("sweep_interval_secs", settings.sweep_interval_secs),
        ("reconcile_interval_secs", settings.reconcile_interval_secs),
        ("creation_timeout_secs", settings.creation_timeout_secs),
        ("provisioner_timeout_secs", settings.provisioner_timeout_secs),
        ("lock_ttl_secs", settings.lock_ttl_secs),
        ("lease_ttl_secs", settings.lease_ttl_secs),
        ("lease_renew_interval_secs", settings.lease_renew_interval_secs),
        ("poll_initial_ms", settings.poll_initial_ms),
    ];
    for (name, value) in non_zero {
        if value == 0 {
            return Err(ValidationError::Zero(name));
        }
    }
    if settings.concurrency_ceiling == 0 {
        return Err(ValidationError::Zero("concurrency_ceiling"));
    }
    if settings.scan_page_size == 0 {
        return Err(ValidationError::Zero("scan_page_size"));
    }

    if settings.lease_renew_interval_secs >= settings.lease_ttl_secs {
        return Err(ValidationError::RenewNotBeforeExpiry {
            renew: settings.lease_renew_interval_secs,
            ttl: settings.lease_ttl_secs,
        });
    }

    if settings.lock_ttl_secs < settings.provisioner_timeout_secs {
        return Err(ValidationError::LockShorterThanProvisioner {
            lock_ttl: settings.lock_ttl_secs,
            provisioner_timeout: settings.provisioner_timeout_secs,
        });
    }

    if settings.poll_initial_ms > settings.poll_max_ms {
        return Err(ValidationError::PollBounds {
            initial: settings.poll_initial_ms,
            max: settings.poll_max_ms,
        });
    }

    if settings.provisioner.kind == ProvisionerKind::Http && settings.provisioner.endpoint.is_none() {
        return Err(ValidationError::MissingEndpoint);
    }

    if settings.reconcile_interval_secs < settings.sweep_interval_secs {
        warn!(
            "reconcile_interval_secs ({}) is shorter than sweep_interval_secs ({})",
            settings.reconcile_interval_secs, settings.sweep_interval_secs
        );
    }

    Ok(())
}
