//! Management API Types

use crate::metrics::{ActiveSessionInfo, LinkStatus};
use crate::relay::SessionStats;
use serde::Serialize;
use std::time::SystemTime;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: SystemTime,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: SystemTime::now(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

/// Forwarder status information
#[derive(Debug, Serialize)]
pub struct ProxyStatus {
    pub listen_addr: String,
    pub remote_addr: String,
    pub link_status: LinkStatus,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
    pub total_sessions: u64,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub dial_failures: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub count: usize,
    pub sessions: Vec<ActiveSessionInfo>,
}

#[derive(Debug, Serialize)]
pub struct RecentSessionList {
    pub count: usize,
    pub sessions: Vec<SessionStats>,
}
