//! Shared run progress counters

use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time view of a run's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    /// Candidates whose client was bound and whose checks started
    pub attempted: usize,
    /// Candidates that passed gating and were named
    pub available: usize,
    /// Candidates in the run after deduplication
    pub total: usize,
}

impl ProgressSnapshot {
    /// Share of candidates attempted, 0.0 to 100.0
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.attempted as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

/// Counters written by workers and polled by the progress reporter.
///
/// A worker bumps `attempted` before it can bump `available` for the same
/// candidate, so `available <= attempted` holds for every snapshot.
#[derive(Debug)]
pub struct RunCounters {
    attempted: AtomicUsize,
    available: AtomicUsize,
    total: usize,
}

impl RunCounters {
    pub fn new(total: usize) -> Self {
        Self {
            attempted: AtomicUsize::new(0),
            available: AtomicUsize::new(0),
            total,
        }
    }

    pub fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_available(&self) {
        self.available.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        // available first: a concurrent attempt can only grow the gap
        let available = self.available.load(Ordering::SeqCst);
        let attempted = self.attempted.load(Ordering::SeqCst);
        ProgressSnapshot {
            attempted,
            available,
            total: self.total,
        }
    }
}
