//! Management API Routes

use super::handlers::*;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

/// Management API router
pub struct ManagementApi;

impl ManagementApi {
    /// Create the management API router
    pub fn create_router(state: AppState) -> Router {
        let api_routes = Router::new()
            .route("/health", get(health_check))
            .route("/status", get(get_status))
            .route("/sessions", get(get_sessions))
            .route("/sessions/recent", get(get_recent_sessions));

        Router::new()
            .nest("/api/v1", api_routes)
            .route("/metrics", get(export_metrics))
            .with_state(state)
            .layer(CorsLayer::permissive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::{Metrics, SessionObserver};
    use crate::relay::{Direction, RelaySession, StopReason};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn create_test_state() -> AppState {
        let config = Config::for_addresses("127.0.0.1:9000", "127.0.0.1:9100");
        AppState::new(Arc::new(config), Arc::new(Metrics::new(10).unwrap()))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = ManagementApi::create_router(create_test_state());
        let (status, body) = get_json(app, "/api/v1/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_reports_link_and_counters() {
        let state = create_test_state();
        let session = Arc::new(RelaySession::new(
            "127.0.0.1:40000".parse().unwrap(),
            "127.0.0.1:9100".parse().unwrap(),
        ));
        state.metrics.session_started(&session);
        state.metrics.bytes_transferred(&session, Direction::Downstream, 7);

        let app = ManagementApi::create_router(state);
        let (status, body) = get_json(app, "/api/v1/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["listen_addr"], "127.0.0.1:9000");
        assert_eq!(body["data"]["remote_addr"], "127.0.0.1:9100");
        assert_eq!(body["data"]["link_status"], "connected");
        assert_eq!(body["data"]["active_sessions"], 1);
        assert_eq!(body["data"]["bytes_down"], 7);
    }

    #[tokio::test]
    async fn test_sessions_endpoints() {
        let state = create_test_state();
        let finished = Arc::new(RelaySession::new(
            "127.0.0.1:40001".parse().unwrap(),
            "127.0.0.1:9100".parse().unwrap(),
        ));
        state.metrics.session_started(&finished);
        state.metrics.session_ended(&finished.to_stats(StopReason::PeerClosed));

        let active = Arc::new(RelaySession::new(
            "127.0.0.1:40002".parse().unwrap(),
            "127.0.0.1:9100".parse().unwrap(),
        ));
        state.metrics.session_started(&active);

        let app = ManagementApi::create_router(state);
        let (_, body) = get_json(app.clone(), "/api/v1/sessions").await;
        assert_eq!(body["data"]["count"], 1);
        assert_eq!(body["data"]["sessions"][0]["session_id"], active.session_id.as_str());

        let (_, body) = get_json(app, "/api/v1/sessions/recent?limit=5").await;
        assert_eq!(body["data"]["count"], 1);
        assert_eq!(body["data"]["sessions"][0]["session_id"], finished.session_id.as_str());
        assert_eq!(body["data"]["sessions"][0]["end_reason"], "peer_closed");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = ManagementApi::create_router(create_test_state());
        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("forward_active_sessions"));
    }
}
