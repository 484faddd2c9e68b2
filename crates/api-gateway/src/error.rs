//! Mapping of engine errors onto HTTP responses

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::error::SessionError;

/// Seconds a client should wait before retrying a retryable failure
const RETRY_AFTER_SECS: &str = "1";

/// Error returned by a handler
#[derive(Debug)]
pub enum ApiError {
    /// Failure reported by the lifecycle engine
    Session(SessionError),

    /// Malformed request
    BadRequest(String),

    /// Unknown session
    NotFound(String),
}

/// JSON body of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code
    pub error: String,

    /// Human-readable description
    pub message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Session(SessionError::AdmissionRejected { .. }) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Session(SessionError::CreationTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Session(SessionError::CreationFailed { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Session(SessionError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Session(SessionError::ProvisionerUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn body(&self) -> ErrorBody {
        let (code, message) = match self {
            ApiError::Session(e) => (e.code(), e.to_string()),
            ApiError::BadRequest(message) => ("bad_request", message.clone()),
            ApiError::NotFound(session_id) => ("not_found", format!("session {} not found", session_id)),
        };
        ErrorBody {
            error: code.to_string(),
            message,
        }
    }

    fn retryable(&self) -> bool {
        match self {
            ApiError::Session(e) => e.is_retryable() || matches!(e, SessionError::AdmissionRejected { .. }),
            _ => false,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        ApiError::Session(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = ?self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = ?self, "Request rejected");
        }

        let retryable = self.retryable();
        let mut response = (status, Json(self.body())).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::error::{ProvisionerError, StoreError};
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (SessionError::AdmissionRejected { live: 5, ceiling: 5 }, StatusCode::TOO_MANY_REQUESTS),
            (
                SessionError::CreationTimeout {
                    session_id: "abc".into(),
                    waited: Duration::from_secs(60),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                SessionError::CreationFailed {
                    session_id: "abc".into(),
                    reason: "quota".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                SessionError::StoreUnavailable(StoreError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                SessionError::ProvisionerUnavailable(ProvisionerError::Transient("503".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status_code(), expected);
        }
    }

    #[test]
    fn test_retry_after_only_on_retryable() {
        let rejected = ApiError::from(SessionError::AdmissionRejected { live: 5, ceiling: 5 }).into_response();
        assert_eq!(rejected.headers().get(header::RETRY_AFTER).unwrap(), "1");

        let failed = ApiError::from(SessionError::CreationFailed {
            session_id: "abc".into(),
            reason: "image not found".into(),
        })
        .into_response();
        assert!(failed.headers().get(header::RETRY_AFTER).is_none());
    }
}
