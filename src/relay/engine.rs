//! Relay Engine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use anyhow::{anyhow, Context};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{Config, DEFAULT_BUFFER_SIZE};
use crate::metrics::{NoopObserver, SessionObserver};
use crate::Result;
use super::{BytePump, Direction, PumpOutcome, RelaySession, SessionCloser, SessionStats, StopReason};

/// Runs sessions: one pump per direction over a paired set of connections
pub struct RelayEngine {
    buffer_size: usize,
    trace_payload: bool,
    observer: Arc<dyn SessionObserver>,
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayEngine {
    /// Create a new relay engine with default buffer size and no observer
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            trace_payload: false,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Create a new relay engine from configuration
    pub fn from_config(config: &Config, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            buffer_size: config.relay.buffer_size,
            trace_payload: config.relay.trace_payload,
            observer,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Relay data between `local` and `remote` until both directions have stopped.
    ///
    /// Whichever pump stops first closes the session, which interrupts the other
    /// one. When `shutdown` fires the session is closed the same way. Both
    /// connections are released exactly once, when the pumps drop their halves.
    pub async fn run_session(
        &self,
        local: TcpStream,
        remote: TcpStream,
        shutdown: Option<broadcast::Receiver<()>>,
    ) -> Result<SessionStats> {
        let client_addr = local.peer_addr()
            .context("Failed to get client address")?;
        let target_addr = remote.peer_addr()
            .context("Failed to get target address")?;

        let session = Arc::new(RelaySession::new(client_addr, target_addr));
        let closer = Arc::new(SessionCloser::new());

        info!(session_id = %session.session_id, "Started relay session {}",
              session.describe(Direction::Upstream));
        self.observer.session_started(&session);

        let (local_read, local_write) = local.into_split();
        let (remote_read, remote_write) = remote.into_split();

        let upstream = tokio::spawn(
            self.pump(Direction::Upstream, &session, &closer)
                .run(local_read, remote_write),
        );
        let downstream = tokio::spawn(
            self.pump(Direction::Downstream, &session, &closer)
                .run(remote_read, local_write),
        );

        let shutdown_fired = Arc::new(AtomicBool::new(false));
        let watcher = shutdown.map(|mut rx| {
            let closer = Arc::clone(&closer);
            let shutdown_fired = Arc::clone(&shutdown_fired);
            tokio::spawn(async move {
                if !matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)) {
                    // Set before closing so the joined pumps always observe it
                    shutdown_fired.store(true, Ordering::SeqCst);
                    closer.close();
                }
            })
        });

        let (up, down) = tokio::join!(upstream, downstream);
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        let up = Self::pump_result(&session, up);
        let down = Self::pump_result(&session, down);

        let end_reason = Self::end_reason(&up, &down, shutdown_fired.load(Ordering::SeqCst));
        let stats = session.to_stats(end_reason);
        session.log_stats(end_reason);
        self.observer.session_ended(&stats);

        match (up, down) {
            (Ok(_), Ok(_)) => Ok(stats),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }

    fn pump(&self, direction: Direction, session: &Arc<RelaySession>, closer: &Arc<SessionCloser>) -> BytePump {
        BytePump::new(
            direction,
            Arc::clone(session),
            Arc::clone(closer),
            Arc::clone(&self.observer),
        )
        .buffer_size(self.buffer_size)
        .trace_payload(self.trace_payload)
    }

    /// The reason of the pump that stopped on its own; the other one only saw the close
    fn end_reason(up: &Result<PumpOutcome>, down: &Result<PumpOutcome>, shutdown_fired: bool) -> StopReason {
        [up, down]
            .into_iter()
            .filter_map(|outcome| outcome.as_ref().ok())
            .map(|outcome| outcome.reason)
            .find(|reason| *reason != StopReason::PeerClosed)
            .unwrap_or(if shutdown_fired {
                StopReason::Shutdown
            } else {
                StopReason::PeerClosed
            })
    }

    fn pump_result(
        session: &RelaySession,
        joined: std::result::Result<PumpOutcome, tokio::task::JoinError>,
    ) -> Result<PumpOutcome> {
        joined.map_err(|e| {
            error!(session_id = %session.session_id, "Pump task failed: {}", e);
            anyhow!("Pump task for session {} failed: {}", session.session_id, e)
        })
    }
}

/// Handle to a session running in the background
pub type SessionHandle = JoinHandle<Result<SessionStats>>;

/// Spawn `run_session` on its own task
pub fn spawn_session(
    engine: Arc<RelayEngine>,
    local: TcpStream,
    remote: TcpStream,
    shutdown: Option<broadcast::Receiver<()>>,
) -> SessionHandle {
    tokio::spawn(async move { engine.run_session(local, remote, shutdown).await })
}
