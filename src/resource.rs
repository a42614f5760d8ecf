//! Resource Management
//!
//! Optional cap on the number of connections handled at once. Each accepted
//! connection holds a slot until its session (or dial failure) is finished.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Limits concurrently handled connections
pub struct ConnectionLimiter {
    max_connections: usize,
    semaphore: Arc<Semaphore>,
    stats: LimiterStats,
}

/// Limiter statistics
#[derive(Debug, Default)]
pub struct LimiterStats {
    pub peak_connections: AtomicUsize,
    pub total_admitted: AtomicUsize,
    pub total_rejected: AtomicUsize,
}

/// A held connection slot; released on drop
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            semaphore: Arc::new(Semaphore::new(max_connections)),
            stats: LimiterStats::default(),
        }
    }

    /// Try to take a slot without waiting
    pub fn try_acquire(&self) -> Option<ConnectionSlot> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.stats.total_admitted.fetch_add(1, Ordering::Relaxed);

                let in_use = self.in_use();
                self.stats.peak_connections.fetch_max(in_use, Ordering::Relaxed);

                debug!("Acquired connection slot, {} of {} in use", in_use, self.max_connections);
                Some(ConnectionSlot { _permit: permit })
            }
            Err(_) => {
                self.stats.total_rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Connection limit reached ({}), rejecting connection", self.max_connections);
                None
            }
        }
    }

    pub fn in_use(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn stats(&self) -> &LimiterStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_limited_and_released() {
        let limiter = ConnectionLimiter::new(2);

        let slot1 = limiter.try_acquire();
        let slot2 = limiter.try_acquire();
        assert!(slot1.is_some());
        assert!(slot2.is_some());
        assert_eq!(limiter.in_use(), 2);

        assert!(limiter.try_acquire().is_none());

        drop(slot1);
        assert_eq!(limiter.in_use(), 1);
        assert!(limiter.try_acquire().is_some());

        let stats = limiter.stats();
        assert_eq!(stats.total_admitted.load(Ordering::Relaxed), 3);
        assert_eq!(stats.total_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(stats.peak_connections.load(Ordering::Relaxed), 2);
    }
}
