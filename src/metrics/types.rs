//! Metrics Types

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::relay::{RelaySession, SessionStats};

/// Whether the forwarder currently carries traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// At least one session is active
    Connected,
    Unlinked,
}

/// Snapshot of an active session
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSessionInfo {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub start_time: SystemTime,
    pub duration_ms: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

impl From<&RelaySession> for ActiveSessionInfo {
    fn from(session: &RelaySession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            client_addr: session.client_addr,
            target_addr: session.target_addr,
            start_time: session.started_at(),
            duration_ms: session.duration().as_millis() as u64,
            bytes_up: session.bytes_up(),
            bytes_down: session.bytes_down(),
        }
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub link_status: LinkStatus,
    pub active_sessions: usize,
    pub total_sessions: u64,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub dial_failures: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

/// Registry of active sessions and recently finished ones
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    pub active_sessions: RwLock<HashMap<String, Arc<RelaySession>>>,
    pub recent_sessions: RwLock<VecDeque<SessionStats>>,
}
