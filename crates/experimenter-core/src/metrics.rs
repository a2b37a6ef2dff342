//! Global atomic counters for experiment activity.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. before a CLI command exits).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    captures: AtomicU64,
    temporary_commits: AtomicU64,
    results_recorded: AtomicU64,
    cancellations: AtomicU64,
    deletions: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            captures: AtomicU64::new(0),
            temporary_commits: AtomicU64::new(0),
            results_recorded: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            deletions: AtomicU64::new(0),
        }
    }

    pub fn inc_captures(&self) {
        self.captures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "captures", "counter incremented");
    }

    pub fn inc_temporary_commits(&self) {
        self.temporary_commits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "temporary_commits", "counter incremented");
    }

    pub fn inc_results_recorded(&self) {
        self.results_recorded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "results_recorded", "counter incremented");
    }

    pub fn inc_cancellations(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cancellations", "counter incremented");
    }

    pub fn inc_deletions(&self) {
        self.deletions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "deletions", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            captures = self.captures(),
            temporary_commits = self.temporary_commits(),
            results_recorded = self.results_recorded(),
            cancellations = self.cancellations(),
            deletions = self.deletions(),
        );
    }

    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }

    pub fn temporary_commits(&self) -> u64 {
        self.temporary_commits.load(Ordering::Relaxed)
    }

    pub fn results_recorded(&self) -> u64 {
        self.results_recorded.load(Ordering::Relaxed)
    }

    pub fn cancellations(&self) -> u64 {
        self.cancellations.load(Ordering::Relaxed)
    }

    pub fn deletions(&self) -> u64 {
        self.deletions.load(Ordering::Relaxed)
    }
}
