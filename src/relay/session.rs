//! Relay Session

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

use super::StopReason;

/// Direction of one byte pump within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Client to remote target
    Upstream,
    /// Remote target to client
    Downstream,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents an active relay session
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub start_time: Instant,
    started_at: SystemTime,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Statistics for a completed session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub start_time: SystemTime,
    pub duration_ms: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub total_bytes: u64,
    /// Why the first direction to stop ended the session
    pub end_reason: StopReason,
}

impl RelaySession {
    /// Create a new relay session with a fresh identifier
    pub fn new(client_addr: SocketAddr, target_addr: SocketAddr) -> Self {
        Self::with_id(format!("relay_{}", uuid::Uuid::new_v4()), client_addr, target_addr)
    }

    pub fn with_id(session_id: String, client_addr: SocketAddr, target_addr: SocketAddr) -> Self {
        debug!("Creating new relay session: {} ({} -> {})",
               session_id, client_addr, target_addr);

        Self {
            session_id,
            client_addr,
            target_addr,
            start_time: Instant::now(),
            started_at: SystemTime::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Human-readable endpoint pair for one direction, e.g. `a:1->b:2`
    pub fn describe(&self, direction: Direction) -> String {
        match direction {
            Direction::Upstream => format!("{}->{}", self.client_addr, self.target_addr),
            Direction::Downstream => format!("{}->{}", self.target_addr, self.client_addr),
        }
    }

    /// Get bytes transferred upstream (client to target)
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Get bytes transferred downstream (target to client)
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn bytes(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Upstream => self.bytes_up(),
            Direction::Downstream => self.bytes_down(),
        }
    }

    /// Get total bytes transferred
    pub fn total_bytes(&self) -> u64 {
        self.bytes_up() + self.bytes_down()
    }

    /// Get session duration
    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Wall-clock time the session started
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Add bytes to the counter of one direction
    pub fn add_bytes(&self, direction: Direction, bytes: u64) {
        match direction {
            Direction::Upstream => self.bytes_up.fetch_add(bytes, Ordering::Relaxed),
            Direction::Downstream => self.bytes_down.fetch_add(bytes, Ordering::Relaxed),
        };
    }

    /// Generate session statistics
    pub fn to_stats(&self, end_reason: StopReason) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            client_addr: self.client_addr,
            target_addr: self.target_addr,
            start_time: self.started_at,
            duration_ms: self.duration().as_millis() as u64,
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            total_bytes: self.total_bytes(),
            end_reason,
        }
    }

    /// Log session statistics
    pub fn log_stats(&self, end_reason: StopReason) {
        info!(
            end_reason = %end_reason,
            session_id = %self.session_id,
            client_addr = %self.client_addr,
            target_addr = %self.target_addr,
            duration_ms = self.duration().as_millis() as u64,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            total_bytes = self.total_bytes(),
            "Relay session completed"
        );
    }
}
