//! Byte Pump
//!
//! Unidirectional read-then-write loop for one direction of a session.

use std::fmt;
use std::io;
use std::sync::Arc;
use serde::{Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::{Direction, RelaySession, SessionCloser};
use crate::metrics::SessionObserver;

/// Why a pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source reached end-of-stream
    SourceClosed,
    ReadFailed(io::ErrorKind),
    WriteFailed(io::ErrorKind),
    /// The other pump of the session closed it first
    PeerClosed,
    /// The proxy closed the session while shutting down
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::SourceClosed => "source_closed",
            StopReason::ReadFailed(_) => "read_failed",
            StopReason::WriteFailed(_) => "write_failed",
            StopReason::PeerClosed => "peer_closed",
            StopReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::ReadFailed(kind) | StopReason::WriteFailed(kind) => {
                write!(f, "{} ({})", self.as_str(), kind)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

impl Serialize for StopReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Result of running one pump to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpOutcome {
    pub direction: Direction,
    pub bytes: u64,
    pub reason: StopReason,
}

/// Copies one direction of a session from `source` to `destination`
pub struct BytePump {
    direction: Direction,
    buffer_size: usize,
    trace_payload: bool,
    session: Arc<RelaySession>,
    closer: Arc<SessionCloser>,
    observer: Arc<dyn SessionObserver>,
}

impl BytePump {
    pub fn new(
        direction: Direction,
        session: Arc<RelaySession>,
        closer: Arc<SessionCloser>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            direction,
            buffer_size: crate::config::DEFAULT_BUFFER_SIZE,
            trace_payload: false,
            session,
            closer,
            observer,
        }
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn trace_payload(mut self, enabled: bool) -> Self {
        self.trace_payload = enabled;
        self
    }

    /// Forward until EOF, an I/O error, or the session being closed by the peer pump.
    ///
    /// On exit the session is closed and both ends are dropped, which releases
    /// this pump's share of the two connections.
    pub async fn run<R, W>(self, mut source: R, mut destination: W) -> PumpOutcome
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let reason = tokio::select! {
            reason = self.copy(&mut source, &mut destination) => reason,
            _ = self.closer.closed() => StopReason::PeerClosed,
        };

        self.closer.close();
        let _ = destination.shutdown().await;

        let outcome = PumpOutcome {
            direction: self.direction,
            bytes: self.session.bytes(self.direction),
            reason,
        };

        debug!(
            session_id = %self.session.session_id,
            direction = %self.direction,
            bytes = outcome.bytes,
            reason = ?outcome.reason,
            "Pump {} stopped", self.session.describe(self.direction)
        );

        outcome
    }

    async fn copy<R, W>(&self, source: &mut R, destination: &mut W) -> StopReason
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let n = match source.read(&mut buf).await {
                Ok(0) => return StopReason::SourceClosed,
                Ok(n) => n,
                Err(e) => return StopReason::ReadFailed(e.kind()),
            };
            let chunk = &buf[..n];

            if self.trace_payload {
                trace!(
                    session_id = %self.session.session_id,
                    direction = %self.direction,
                    "{} body:{:?}", self.session.describe(self.direction), chunk
                );
            }

            // write_all keeps writing the remainder after a partial write
            if let Err(e) = destination.write_all(chunk).await {
                return StopReason::WriteFailed(e.kind());
            }

            self.session.add_bytes(self.direction, n as u64);
            self.observer.bytes_transferred(&self.session, self.direction, n as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopObserver;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::io::Builder;

    fn session() -> Arc<RelaySession> {
        Arc::new(RelaySession::new(
            "127.0.0.1:1111".parse().unwrap(),
            "127.0.0.1:2222".parse().unwrap(),
        ))
    }

    #[derive(Default)]
    struct ChunkCounter {
        chunks: AtomicU64,
        bytes: AtomicU64,
    }

    impl SessionObserver for ChunkCounter {
        fn bytes_transferred(&self, _session: &RelaySession, _direction: Direction, bytes: u64) {
            self.chunks.fetch_add(1, Ordering::SeqCst);
            self.bytes.fetch_add(bytes, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_forwards_chunks_in_order_until_eof() {
        let source = Builder::new().read(b"hello ").read(b"world").build();
        let destination = Builder::new().write(b"hello ").write(b"world").build();

        let session = session();
        let closer = Arc::new(SessionCloser::new());
        let counter = Arc::new(ChunkCounter::default());

        let outcome = BytePump::new(Direction::Upstream, session.clone(), closer.clone(), counter.clone())
            .run(source, destination)
            .await;

        assert_eq!(outcome.reason, StopReason::SourceClosed);
        assert_eq!(outcome.bytes, 11);
        assert_eq!(session.bytes_up(), 11);
        assert_eq!(session.bytes_down(), 0);
        assert_eq!(counter.chunks.load(Ordering::SeqCst), 2);
        assert_eq!(counter.bytes.load(Ordering::SeqCst), 11);
        assert!(closer.is_closed());
    }

    /// Accepts at most three bytes per write call
    #[derive(Default)]
    struct TrickleWriter {
        written: Vec<u8>,
        calls: usize,
    }

    impl AsyncWrite for TrickleWriter {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            let n = buf.len().min(3);
            self.written.extend_from_slice(&buf[..n]);
            self.calls += 1;
            std::task::Poll::Ready(Ok(n))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_payload_tracing_keeps_forwarding() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let source = Builder::new().read(b"GET / HTTP/1.1\r\n").read(b"\r\n").build();
        let destination = Builder::new().write(b"GET / HTTP/1.1\r\n").write(b"\r\n").build();

        let session = session();
        let outcome = BytePump::new(
            Direction::Upstream,
            session.clone(),
            Arc::new(SessionCloser::new()),
            Arc::new(NoopObserver),
        )
        .trace_payload(true)
        .run(source, destination)
        .await;

        assert_eq!(outcome.reason, StopReason::SourceClosed);
        assert_eq!(session.bytes_up(), 18);
    }

    #[test]
    fn test_stop_reason_serializes_as_text() {
        let reset = StopReason::ReadFailed(io::ErrorKind::ConnectionReset);
        assert_eq!(serde_json::to_value(StopReason::SourceClosed).unwrap(), "source_closed");
        assert_eq!(reset.as_str(), "read_failed");
        assert!(reset.to_string().starts_with("read_failed ("));
    }

    #[tokio::test]
    async fn test_partial_writes_are_retried() {
        let source = Builder::new().read(b"abcdefgh").build();
        let mut destination = TrickleWriter::default();

        let session = session();
        let outcome = BytePump::new(
            Direction::Downstream,
            session.clone(),
            Arc::new(SessionCloser::new()),
            Arc::new(NoopObserver),
        )
        .run(source, &mut destination)
        .await;

        assert_eq!(outcome.reason, StopReason::SourceClosed);
        assert_eq!(session.bytes_down(), 8);
        assert_eq!(destination.written, b"abcdefgh");
        assert_eq!(destination.calls, 3);
    }

    #[tokio::test]
    async fn test_reads_are_bounded_by_buffer_size() {
        let source = Builder::new().read(b"0123456789").build();
        let destination = Builder::new().write(b"0123").write(b"4567").write(b"89").build();

        let counter = Arc::new(ChunkCounter::default());
        let outcome = BytePump::new(
            Direction::Upstream,
            session(),
            Arc::new(SessionCloser::new()),
            counter.clone(),
        )
        .buffer_size(4)
        .run(source, destination)
        .await;

        assert_eq!(outcome.bytes, 10);
        assert_eq!(counter.chunks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_read_error_stops_pump() {
        let source = Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let destination = Builder::new().write(b"partial").build();

        let closer = Arc::new(SessionCloser::new());
        let outcome = BytePump::new(Direction::Upstream, session(), closer.clone(), Arc::new(NoopObserver))
            .run(source, destination)
            .await;

        assert_eq!(outcome.reason, StopReason::ReadFailed(io::ErrorKind::ConnectionReset));
        assert_eq!(outcome.bytes, 7);
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn test_write_error_stops_pump_without_counting_chunk() {
        let source = Builder::new().read(b"first").read(b"second").build();
        let destination = Builder::new()
            .write(b"first")
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();

        let session = session();
        let closer = Arc::new(SessionCloser::new());
        let outcome = BytePump::new(Direction::Upstream, session.clone(), closer.clone(), Arc::new(NoopObserver))
            .run(source, destination)
            .await;

        assert_eq!(outcome.reason, StopReason::WriteFailed(io::ErrorKind::BrokenPipe));
        assert_eq!(session.bytes_up(), 5);
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn test_blocked_pump_is_interrupted_by_peer_close() {
        // Nothing is ever written to the far side of `source`, so the read blocks
        let (_source_peer, source) = tokio::io::duplex(64);
        let (destination, _destination_peer) = tokio::io::duplex(64);

        let closer = Arc::new(SessionCloser::new());
        let pump = BytePump::new(Direction::Downstream, session(), closer.clone(), Arc::new(NoopObserver));
        let handle = tokio::spawn(pump.run(source, destination));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        assert!(closer.close());
        let outcome = timeout(Duration::from_secs(1), handle)
            .await
            .expect("pump should stop after close")
            .unwrap();
        assert_eq!(outcome.reason, StopReason::PeerClosed);
        assert_eq!(outcome.bytes, 0);
    }

    #[tokio::test]
    async fn test_destination_sees_eof_after_pump_stops() {
        let (mut client, source) = tokio::io::duplex(64);
        let (destination, mut remote) = tokio::io::duplex(64);

        let pump = BytePump::new(
            Direction::Upstream,
            session(),
            Arc::new(SessionCloser::new()),
            Arc::new(NoopObserver),
        );
        let handle = tokio::spawn(pump.run(source, destination));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        let outcome = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(outcome.reason, StopReason::SourceClosed);

        let mut rest = Vec::new();
        let n = remote.read_to_end(&mut rest).await.unwrap();
        assert_eq!(n, 0);
    }
}
