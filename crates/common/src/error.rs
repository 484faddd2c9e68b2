//! Error types for the common crate
//!
//! This module defines the error taxonomy used throughout the session
//! orchestrator: the general [`Error`], the failures of the two external
//! collaborators ([`StoreError`], [`ProvisionerError`]) and the errors a
//! routing caller can observe ([`SessionError`]).

use std::time::Duration;
use thiserror::Error;

/// Result type for general orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// General error type for orchestrator operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// External service error
    #[error("External service error: {0}")]
    ExternalService(String),
}

impl Error {
    /// Returns true if the error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true if the error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// Failure of the session store, lock or lease backend.
///
/// Every store failure is transient from the engine's point of view: a
/// timeout is never interpreted as "record absent".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend could not be reached or did not answer in time
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the unit provisioner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionerError {
    /// Retryable failure (throttling, 5xx, transport error)
    #[error("transient provisioner failure: {0}")]
    Transient(String),

    /// The request can never succeed as issued
    #[error("permanent provisioner failure: {0}")]
    Permanent(String),

    /// The call did not finish within the per-call budget
    #[error("provisioner call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProvisionerError {
    /// Returns true if a later retry may succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProvisionerError::Permanent(_))
    }
}

/// Errors surfaced to callers of the lifecycle engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Concurrency ceiling reached; nothing was locked or provisioned
    #[error("admission rejected: {live} live sessions at ceiling {ceiling}")]
    AdmissionRejected { live: usize, ceiling: usize },

    /// Waiting for the session's unit exceeded the creation timeout
    #[error("creation of session {session_id} timed out after {waited:?}")]
    CreationTimeout { session_id: String, waited: Duration },

    /// The unit could not be created; the record was rolled back
    #[error("creation of session {session_id} failed: {reason}")]
    CreationFailed { session_id: String, reason: String },

    /// Session store unavailable; retry with backoff
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// Provisioner unavailable for a non-creation operation
    #[error("provisioner unavailable: {0}")]
    ProvisionerUnavailable(ProvisionerError),
}

impl SessionError {
    /// Returns true if the caller should retry later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::StoreUnavailable(_)
                | SessionError::ProvisionerUnavailable(_)
                | SessionError::CreationTimeout { .. }
        )
    }

    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::AdmissionRejected { .. } => "admission_rejected",
            SessionError::CreationTimeout { .. } => "creation_timeout",
            SessionError::CreationFailed { .. } => "creation_failed",
            SessionError::StoreUnavailable(_) => "store_unavailable",
            SessionError::ProvisionerUnavailable(_) => "provisioner_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioner_error_classification() {
        assert!(ProvisionerError::Transient("503".into()).is_transient());
        assert!(ProvisionerError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ProvisionerError::Permanent("bad template".into()).is_transient());
    }

    #[test]
    fn test_session_error_codes() {
        let err = SessionError::AdmissionRejected { live: 10, ceiling: 10 };
        assert_eq!(err.code(), "admission_rejected");
        assert!(!err.is_retryable());

        let err: SessionError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.code(), "store_unavailable");
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "session store unavailable: down");
    }
}
