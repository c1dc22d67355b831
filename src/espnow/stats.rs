//! Send/receive counters.
//!
//! Increments are lock-free with respect to each other (shared lock plus
//! atomic add); `reset` and `snapshot` take the exclusive lock, so a reset
//! never interleaves with an increment and a snapshot is always consistent
//! across the three counters.

use super::{read_recover, write_recover};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages confirmed delivered.
    pub sent_success: u64,
    /// Messages that failed every attempt.
    pub sent_fail: u64,
    /// Frames published as `DataReceived`.
    pub received: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Stats {
    sent_success: AtomicU64,
    sent_fail: AtomicU64,
    received: AtomicU64,
    epoch: RwLock<()>,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&self, success: bool) {
        let _epoch = read_recover(&self.epoch);
        if success {
            self.sent_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sent_fail.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_received(&self) {
        let _epoch = read_recover(&self.epoch);
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let _epoch = write_recover(&self.epoch);
        StatsSnapshot {
            sent_success: self.sent_success.load(Ordering::Relaxed),
            sent_fail: self.sent_fail.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        let _epoch = write_recover(&self.epoch);
        self.sent_success.store(0, Ordering::Relaxed);
        self.sent_fail.store(0, Ordering::Relaxed);
        self.received.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_stats_are_zero() {
        let stats = Stats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_record_and_reset() {
        let stats = Stats::new();
        stats.record_sent(true);
        stats.record_sent(false);
        stats.record_sent(false);
        stats.record_received();

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                sent_success: 1,
                sent_fail: 2,
                received: 1,
            }
        );

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_reset_during_concurrent_increments() {
        let stats = Arc::new(Stats::new());
        let writer = {
            let stats = stats.clone();
            thread::spawn(move || {
                for _ in 0..10_000 {
                    stats.record_sent(true);
                    stats.record_received();
                }
            })
        };

        for _ in 0..100 {
            stats.reset();
        }
        writer.join().unwrap();

        // Every increment landed either before a reset or after the last one.
        let snapshot = stats.snapshot();
        assert!(snapshot.sent_success <= 10_000);
        assert!(snapshot.received <= 10_000);
        assert_eq!(snapshot.sent_fail, 0);
    }
}
