//! Request handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::models::{SessionRecord, UnitRef};
use orchestrator_core::MetricsSnapshot;

use crate::error::ApiError;
use crate::routes::ApiState;

/// Body of `POST /sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub session_id: String,
}

/// Unit serving a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub session_id: String,
    pub unit_ref: UnitRef,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service state, e.g. `Serving` or `Degraded: <reason>`
    pub state: String,
    pub replica_id: String,
    pub leader: bool,
}

fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    if session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("session_id must not be empty".to_string()));
    }
    Ok(())
}

/// `GET /health`
///
/// 200 while the replica serves requests (degraded included), 503 otherwise.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let current = state.lifecycle.state().await;
    let leadership = state.engine.leadership();

    let status = if current.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            state: current.to_string(),
            replica_id: leadership.replica_id().to_string(),
            leader: leadership.is_leader(),
        }),
    )
}

/// `POST /sessions`: resolve a session to its unit, creating it if needed
pub async fn resolve_session(
    State(state): State<ApiState>,
    Json(request): Json<ResolveRequest>,
) -> Result<(StatusCode, Json<ResolveResponse>), ApiError> {
    validate_session_id(&request.session_id)?;

    let unit_ref = state.engine.resolve_or_create(&request.session_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ResolveResponse {
            session_id: request.session_id,
            unit_ref,
        }),
    ))
}

/// `GET /sessions/:id/status`
pub async fn session_status(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionRecord>, ApiError> {
    match state.engine.session_status(&session_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound(session_id)),
    }
}

/// `POST /sessions/:id/touch`
///
/// Best-effort: unknown sessions are ignored, never created.
pub async fn touch_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.engine.touch(&session_id).await? {
        debug!(session_id = %session_id, "Touch had no effect");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /sessions/:id`
pub async fn delete_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.engine.delete_session(&session_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(session_id))
    }
}

/// `GET /metrics`
///
/// Recounts READY sessions first; if the store is down the last count is
/// served.
pub async fn metrics(State(state): State<ApiState>) -> Json<MetricsSnapshot> {
    if let Err(e) = state.engine.refresh_gauges().await {
        warn!(error = %e, "Serving stale session gauge");
    }
    Json(state.engine.metrics().snapshot())
}
