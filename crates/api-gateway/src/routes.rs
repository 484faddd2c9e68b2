//! Route table

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use orchestrator_core::{LifecycleEngine, LifecycleManager};

use crate::handlers;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub engine: LifecycleEngine,
    pub lifecycle: Arc<LifecycleManager>,
}

impl ApiState {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            engine: lifecycle.engine().clone(),
            lifecycle,
        }
    }
}

/// Builds the API router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/sessions", post(handlers::resolve_session))
        .route("/sessions/:id", axum::routing::delete(handlers::delete_session))
        .route("/sessions/:id/status", get(handlers::session_status))
        .route("/sessions/:id/touch", post(handlers::touch_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorBody;
    use crate::handlers::{HealthResponse, ResolveResponse};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use common::models::{SessionRecord, SessionStatus};
    use orchestrator_core::{EngineConfig, LeadershipCoordinator, MetricsSnapshot, SessionMetrics};
    use serde::de::DeserializeOwned;
    use std::time::Duration;
    use storage_adapter::{InMemoryLeaseStore, InMemoryReservationLock, InMemorySessionStore};
    use tower::ServiceExt;
    use unit_provisioner::InMemoryProvisioner;

    struct TestApi {
        app: Router,
        lifecycle: Arc<LifecycleManager>,
        store: Arc<InMemorySessionStore>,
    }

    fn test_api(config: EngineConfig) -> TestApi {
        let store = Arc::new(InMemorySessionStore::new());
        let leadership = Arc::new(LeadershipCoordinator::new(
            "replica-a",
            Arc::new(InMemoryLeaseStore::new()),
            config.lease_ttl,
        ));
        let engine = LifecycleEngine::new(
            store.clone(),
            Arc::new(InMemoryReservationLock::new()),
            Arc::new(InMemoryProvisioner::new()),
            leadership,
            Arc::new(SessionMetrics::new()),
            config,
        );
        let lifecycle = Arc::new(LifecycleManager::new(engine));

        TestApi {
            app: router(ApiState::new(lifecycle.clone())),
            lifecycle,
            store,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            creation_timeout: Duration::from_secs(2),
            provisioner_timeout: Duration::from_secs(1),
            poll_initial: Duration::from_millis(5),
            poll_max: Duration::from_millis(20),
            ..EngineConfig::default()
        }
    }

    fn resolve_request(session_id: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/sessions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::json!({ "session_id": session_id }).to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body<T: DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_creates_then_reuses() {
        let api = test_api(config());

        let response = api.app.clone().oneshot(resolve_request("abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let first: ResolveResponse = json_body(response).await;
        assert_eq!(first.session_id, "abc");

        let response = api.app.clone().oneshot(resolve_request("abc")).await.unwrap();
        let second: ResolveResponse = json_body(response).await;
        assert_eq!(first.unit_ref, second.unit_ref);
    }

    #[tokio::test]
    async fn test_empty_session_id_is_rejected() {
        let api = test_api(config());

        let response = api.app.clone().oneshot(resolve_request("  ")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(api.store.is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_maps_to_429() {
        let api = test_api(EngineConfig {
            concurrency_ceiling: 1,
            ..config()
        });

        let response = api.app.clone().oneshot(resolve_request("a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = api.app.clone().oneshot(resolve_request("b")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let body: ErrorBody = json_body(response).await;
        assert_eq!(body.error, "admission_rejected");
    }

    #[tokio::test]
    async fn test_store_outage_maps_to_503() {
        let api = test_api(config());
        api.store.set_available(false);

        let response = api.app.clone().oneshot(resolve_request("abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: ErrorBody = json_body(response).await;
        assert_eq!(body.error, "store_unavailable");
    }

    #[tokio::test]
    async fn test_status_touch_and_delete() {
        let api = test_api(config());

        let response = api
            .app
            .clone()
            .oneshot(empty_request("GET", "/sessions/abc/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Touch never creates a session
        let response = api
            .app
            .clone()
            .oneshot(empty_request("POST", "/sessions/abc/touch"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(api.store.is_empty());

        api.app.clone().oneshot(resolve_request("abc")).await.unwrap();

        let response = api
            .app
            .clone()
            .oneshot(empty_request("GET", "/sessions/abc/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record: SessionRecord = json_body(response).await;
        assert_eq!(record.status, SessionStatus::Ready);

        let response = api
            .app
            .clone()
            .oneshot(empty_request("DELETE", "/sessions/abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = api
            .app
            .clone()
            .oneshot(empty_request("DELETE", "/sessions/abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = api.app.clone().oneshot(empty_request("GET", "/metrics")).await.unwrap();
        let snapshot: MetricsSnapshot = json_body(response).await;
        assert_eq!(snapshot.creations_succeeded, 1);
        assert_eq!(snapshot.deletions_explicit, 1);
    }

    #[tokio::test]
    async fn test_metrics_counts_ready_sessions_without_leadership() {
        let api = test_api(config());
        api.app.clone().oneshot(resolve_request("a")).await.unwrap();
        api.app.clone().oneshot(resolve_request("b")).await.unwrap();

        let response = api.app.clone().oneshot(empty_request("GET", "/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot: MetricsSnapshot = json_body(response).await;
        assert_eq!(snapshot.ready_sessions, 2);
        assert!(!api.lifecycle.engine().leadership().is_leader());

        // A store outage serves the last count instead of failing
        api.store.set_available(false);
        let response = api.app.clone().oneshot(empty_request("GET", "/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot: MetricsSnapshot = json_body(response).await;
        assert_eq!(snapshot.ready_sessions, 2);
    }

    #[tokio::test]
    async fn test_health_follows_service_state() {
        let api = test_api(config());

        let response = api.app.clone().oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        api.lifecycle.start().await.unwrap();
        let response = api.app.clone().oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = json_body(response).await;
        assert_eq!(health.state, "Serving");
        assert_eq!(health.replica_id, "replica-a");

        api.lifecycle.stop().await.unwrap();
        let response = api.app.clone().oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
