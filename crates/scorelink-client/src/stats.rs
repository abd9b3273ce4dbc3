//! Connection statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A snapshot of the manager's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Handshakes started (initial connects and reconnect attempts)
    pub connect_attempts: u64,
    /// Handshakes that completed
    pub successful_connects: u64,
    /// Connections re-established after an unexpected drop
    pub reconnects: u64,
    /// Subscribe invocations that failed
    pub subscribe_failures: u64,
    /// Update events handed to consumers
    pub events_dispatched: u64,
    /// Liveness pings sent
    pub heartbeats_sent: u64,
}

/// Lock-free counters updated from the manager's tasks.
#[derive(Debug, Default)]
pub(crate) struct AtomicStats {
    pub(crate) connect_attempts: AtomicU64,
    pub(crate) successful_connects: AtomicU64,
    pub(crate) reconnects: AtomicU64,
    pub(crate) subscribe_failures: AtomicU64,
    pub(crate) events_dispatched: AtomicU64,
    pub(crate) heartbeats_sent: AtomicU64,
}

impl AtomicStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(amount as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            successful_connects: self.successful_connects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            subscribe_failures: self.subscribe_failures.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = AtomicStats::default();
        assert_eq!(stats.snapshot(), ConnectionStats::default());

        AtomicStats::incr(&stats.connect_attempts);
        AtomicStats::incr(&stats.connect_attempts);
        AtomicStats::add(&stats.subscribe_failures, 3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connect_attempts, 2);
        assert_eq!(snapshot.subscribe_failures, 3);
        assert_eq!(snapshot.reconnects, 0);
    }
}
