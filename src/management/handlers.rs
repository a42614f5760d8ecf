//! Management API Handlers

use super::types::*;
use crate::config::Config;
use crate::metrics::Metrics;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::SystemTime;

const DEFAULT_RECENT_LIMIT: usize = 50;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub start_time: SystemTime,
}

impl AppState {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            metrics,
            start_time: SystemTime::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

/// Health check handler
pub async fn health_check() -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::success(HealthStatus {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// Get forwarder status
pub async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<ProxyStatus>> {
    let uptime = SystemTime::now()
        .duration_since(state.start_time)
        .unwrap_or_default()
        .as_secs();
    let snapshot = state.metrics.snapshot();

    let status = ProxyStatus {
        listen_addr: state.config.server.listen_addr.clone(),
        remote_addr: state.config.server.remote_addr.clone(),
        link_status: snapshot.link_status,
        uptime_seconds: uptime,
        active_sessions: snapshot.active_sessions,
        total_sessions: snapshot.total_sessions,
        connections_accepted: snapshot.connections_accepted,
        connections_rejected: snapshot.connections_rejected,
        dial_failures: snapshot.dial_failures,
        bytes_up: snapshot.bytes_up,
        bytes_down: snapshot.bytes_down,
    };

    Json(ApiResponse::success(status))
}

/// List active sessions
pub async fn get_sessions(State(state): State<AppState>) -> Json<ApiResponse<SessionList>> {
    let sessions = state.metrics.active_sessions();
    Json(ApiResponse::success(SessionList {
        count: sessions.len(),
        sessions,
    }))
}

/// List recently finished sessions, newest first
pub async fn get_recent_sessions(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Json<ApiResponse<RecentSessionList>> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    let sessions = state.metrics.recent_sessions(limit);
    Json(ApiResponse::success(RecentSessionList {
        count: sessions.len(),
        sessions,
    }))
}

/// Prometheus text exposition
pub async fn export_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(),
    )
}
