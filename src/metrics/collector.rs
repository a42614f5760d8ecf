//! Metrics Collector

use super::{ActiveSessionInfo, LinkStatus, MetricsRegistry, MetricsSnapshot, SessionObserver};
use crate::relay::{Direction, RelaySession, SessionStats};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Collects forwarding metrics and keeps the session registry
pub struct Metrics {
    registry: MetricsRegistry,
    prometheus_registry: Registry,
    max_recent_sessions: usize,

    // Prometheus metrics
    connections_accepted_total: IntCounter,
    connections_rejected_total: IntCounter,
    dial_failures_total: IntCounter,
    sessions_total: IntCounter,
    active_sessions: IntGauge,
    bytes_total: IntCounterVec,
    session_duration: Histogram,

    // Internal counters
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    dial_failures: AtomicU64,
    total_sessions: AtomicU64,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector keeping up to `max_recent_sessions` finished sessions
    pub fn new(max_recent_sessions: usize) -> prometheus::Result<Self> {
        let prometheus_registry = Registry::new();

        let connections_accepted_total = IntCounter::new(
            "forward_connections_accepted_total",
            "Total number of accepted inbound connections",
        )?;
        let connections_rejected_total = IntCounter::new(
            "forward_connections_rejected_total",
            "Inbound connections closed because the connection limit was reached",
        )?;
        let dial_failures_total = IntCounter::new(
            "forward_dial_failures_total",
            "Failed dials to the remote target",
        )?;
        let sessions_total = IntCounter::new(
            "forward_sessions_total",
            "Total number of established forwarding sessions",
        )?;
        let active_sessions = IntGauge::new(
            "forward_active_sessions",
            "Number of currently active forwarding sessions",
        )?;
        let bytes_total = IntCounterVec::new(
            Opts::new("forward_bytes_total", "Bytes forwarded, by direction"),
            &["direction"],
        )?;
        let session_duration = Histogram::with_opts(
            HistogramOpts::new(
                "forward_session_duration_seconds",
                "Duration of forwarding sessions in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]),
        )?;

        prometheus_registry.register(Box::new(connections_accepted_total.clone()))?;
        prometheus_registry.register(Box::new(connections_rejected_total.clone()))?;
        prometheus_registry.register(Box::new(dial_failures_total.clone()))?;
        prometheus_registry.register(Box::new(sessions_total.clone()))?;
        prometheus_registry.register(Box::new(active_sessions.clone()))?;
        prometheus_registry.register(Box::new(bytes_total.clone()))?;
        prometheus_registry.register(Box::new(session_duration.clone()))?;

        Ok(Self {
            registry: MetricsRegistry::default(),
            prometheus_registry,
            max_recent_sessions,
            connections_accepted_total,
            connections_rejected_total,
            dial_failures_total,
            sessions_total,
            active_sessions,
            bytes_total,
            session_duration,
            connections_accepted: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
            total_sessions: AtomicU64::new(0),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        })
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.registry
            .active_sessions
            .read()
            .map(|active| active.len())
            .unwrap_or(0)
    }

    pub fn link_status(&self) -> LinkStatus {
        if self.active_session_count() > 0 {
            LinkStatus::Connected
        } else {
            LinkStatus::Unlinked
        }
    }

    /// Get current counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            link_status: self.link_status(),
            active_sessions: self.active_session_count(),
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
        }
    }

    /// Active sessions, oldest first
    pub fn active_sessions(&self) -> Vec<ActiveSessionInfo> {
        let mut sessions: Vec<ActiveSessionInfo> = self
            .registry
            .active_sessions
            .read()
            .map(|active| active.values().map(|s| ActiveSessionInfo::from(s.as_ref())).collect())
            .unwrap_or_default();
        sessions.sort_by_key(|s| s.start_time);
        sessions
    }

    /// Most recently finished sessions, newest first
    pub fn recent_sessions(&self, limit: usize) -> Vec<SessionStats> {
        match self.registry.recent_sessions.read() {
            Ok(recent) => recent.iter().rev().take(limit).cloned().collect(),
            Err(_) => {
                warn!("Failed to acquire read lock on recent sessions");
                Vec::new()
            }
        }
    }
}

impl SessionObserver for Metrics {
    fn connection_accepted(&self, _peer: SocketAddr) {
        self.connections_accepted_total.inc();
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_rejected(&self, _peer: SocketAddr) {
        self.connections_rejected_total.inc();
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn dial_failed(&self, _peer: SocketAddr, _remote: &str, _error: &anyhow::Error) {
        self.dial_failures_total.inc();
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn session_started(&self, session: &Arc<RelaySession>) {
        match self.registry.active_sessions.write() {
            Ok(mut active) => {
                active.insert(session.session_id.clone(), Arc::clone(session));
            }
            Err(_) => warn!("Failed to acquire write lock on active sessions"),
        }

        self.sessions_total.inc();
        self.active_sessions.inc();
        self.total_sessions.fetch_add(1, Ordering::Relaxed);

        debug!(session_id = %session.session_id, "Started tracking session");
    }

    fn bytes_transferred(&self, _session: &RelaySession, direction: Direction, bytes: u64) {
        self.bytes_total.with_label_values(&[direction.as_str()]).inc_by(bytes);
        match direction {
            Direction::Upstream => self.bytes_up.fetch_add(bytes, Ordering::Relaxed),
            Direction::Downstream => self.bytes_down.fetch_add(bytes, Ordering::Relaxed),
        };
    }

    fn session_ended(&self, stats: &SessionStats) {
        let removed = match self.registry.active_sessions.write() {
            Ok(mut active) => active.remove(&stats.session_id).is_some(),
            Err(_) => false,
        };

        if !removed {
            warn!(session_id = %stats.session_id, "Attempted to end tracking for unknown session");
            return;
        }

        self.active_sessions.dec();
        self.session_duration.observe(stats.duration_ms as f64 / 1000.0);

        if let Ok(mut recent) = self.registry.recent_sessions.write() {
            recent.push_back(stats.clone());
            while recent.len() > self.max_recent_sessions {
                recent.pop_front();
            }
        }

        debug!(
            session_id = %stats.session_id,
            duration_ms = stats.duration_ms,
            bytes_up = stats.bytes_up,
            bytes_down = stats.bytes_down,
            "Ended session tracking"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::StopReason;

    fn session() -> Arc<RelaySession> {
        Arc::new(RelaySession::new(
            "127.0.0.1:40000".parse().unwrap(),
            "127.0.0.1:9100".parse().unwrap(),
        ))
    }

    #[test]
    fn test_session_lifecycle_updates_counters() {
        let metrics = Metrics::new(10).unwrap();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        assert_eq!(metrics.link_status(), LinkStatus::Unlinked);

        metrics.connection_accepted(peer);
        let session = session();
        metrics.session_started(&session);
        assert_eq!(metrics.link_status(), LinkStatus::Connected);

        session.add_bytes(Direction::Upstream, 4);
        metrics.bytes_transferred(&session, Direction::Upstream, 4);
        session.add_bytes(Direction::Downstream, 6);
        metrics.bytes_transferred(&session, Direction::Downstream, 6);

        let active = metrics.active_sessions();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].bytes_up, 4);
        assert_eq!(active[0].bytes_down, 6);

        metrics.session_ended(&session.to_stats(StopReason::SourceClosed));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.link_status, LinkStatus::Unlinked);
        assert_eq!(snapshot.active_sessions, 0);
        assert_eq!(snapshot.total_sessions, 1);
        assert_eq!(snapshot.connections_accepted, 1);
        assert_eq!(snapshot.bytes_up, 4);
        assert_eq!(snapshot.bytes_down, 6);

        let recent = metrics.recent_sessions(5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].session_id, session.session_id);
        assert_eq!(recent[0].end_reason, StopReason::SourceClosed);
    }

    #[test]
    fn test_failures_and_rejections_are_counted() {
        let metrics = Metrics::new(10).unwrap();
        let peer: SocketAddr = "127.0.0.1:40001".parse().unwrap();

        metrics.connection_rejected(peer);
        metrics.dial_failed(peer, "127.0.0.1:1", &anyhow::anyhow!("refused"));
        metrics.dial_failed(peer, "127.0.0.1:1", &anyhow::anyhow!("refused"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_rejected, 1);
        assert_eq!(snapshot.dial_failures, 2);
        assert_eq!(snapshot.total_sessions, 0);
    }

    #[test]
    fn test_recent_sessions_are_bounded() {
        let metrics = Metrics::new(2).unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let session = session();
            metrics.session_started(&session);
            metrics.session_ended(&session.to_stats(StopReason::SourceClosed));
            ids.push(session.session_id.clone());
        }

        let recent = metrics.recent_sessions(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].session_id, ids[2]);
        assert_eq!(recent[1].session_id, ids[1]);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new(10).unwrap();
        let session = session();
        metrics.session_started(&session);
        metrics.bytes_transferred(&session, Direction::Upstream, 42);

        let output = metrics.export_prometheus();
        assert!(output.contains("forward_active_sessions 1"));
        assert!(output.contains("forward_bytes_total{direction=\"upstream\"} 42"));
        assert!(output.contains("forward_sessions_total 1"));
    }
}
