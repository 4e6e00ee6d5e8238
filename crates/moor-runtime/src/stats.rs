//! Runtime statistics
//!
//! All counters are atomic and can be read at any time without locking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between callers and the worker
#[derive(Debug, Default)]
pub struct RuntimeStats {
    /// Units of work sent across threads to the worker
    pub jobs_submitted: AtomicU64,
    /// Units of work the worker finished (successfully or not)
    pub jobs_completed: AtomicU64,
    /// Units of work run in place on the worker thread
    pub reentrant_calls: AtomicU64,
    /// Handles created (values rooted)
    pub handles_rooted: AtomicU64,
    /// Roots released by the worker
    pub handles_released: AtomicU64,
    /// Release requests posted by dropped handles
    pub dispose_requests: AtomicU64,
}

impl RuntimeStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> RuntimeStatsSnapshot {
        RuntimeStatsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            reentrant_calls: self.reentrant_calls.load(Ordering::Relaxed),
            handles_rooted: self.handles_rooted.load(Ordering::Relaxed),
            handles_released: self.handles_released.load(Ordering::Relaxed),
            dispose_requests: self.dispose_requests.load(Ordering::Relaxed),
        }
    }

    /// Get the number of jobs currently in flight
    pub fn jobs_in_flight(&self) -> u64 {
        let submitted = self.jobs_submitted.load(Ordering::Relaxed);
        let completed = self.jobs_completed.load(Ordering::Relaxed);
        submitted.saturating_sub(completed)
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of runtime statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStatsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub reentrant_calls: u64,
    pub handles_rooted: u64,
    pub handles_released: u64,
    pub dispose_requests: u64,
}

impl RuntimeStatsSnapshot {
    /// Handles rooted but not yet released
    pub fn live_handles(&self) -> u64 {
        self.handles_rooted.saturating_sub(self.handles_released)
    }
}
