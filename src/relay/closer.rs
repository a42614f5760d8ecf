//! Session Closer
//!
//! Single-shot close signal shared by the two pumps of a session. Whichever
//! pump stops first flips the flag and wakes the other one; later calls are
//! no-ops. The sockets themselves are released when the pumps drop their
//! owned halves, so each connection is closed exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct SessionCloser {
    closed: AtomicBool,
    notify: Notify,
}

impl SessionCloser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session closed. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let first = self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once `close` has been called, immediately if it already was
    pub async fn closed(&self) {
        loop {
            // Register before checking the flag so a concurrent close cannot be missed
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_close_is_single_shot() {
        let closer = SessionCloser::new();
        assert!(!closer.is_closed());
        assert!(closer.close());
        assert!(!closer.close());
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn test_closed_resolves_immediately_when_already_closed() {
        let closer = SessionCloser::new();
        closer.close();
        assert!(timeout(Duration::from_millis(100), closer.closed()).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_is_woken_by_close() {
        let closer = Arc::new(SessionCloser::new());
        let waiter = {
            let closer = Arc::clone(&closer);
            tokio::spawn(async move { closer.closed().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        closer.close();
        assert!(timeout(Duration::from_secs(1), waiter).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close_wins_exactly_once() {
        let closer = Arc::new(SessionCloser::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let closer = Arc::clone(&closer);
            let winners = Arc::clone(&winners);
            handles.push(tokio::spawn(async move {
                if closer.close() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
