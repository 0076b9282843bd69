// Performance metrics module
//
// Lightweight counters for monitoring the engine across its lifetime

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Engine-wide counters.
///
/// Uses atomic operations for thread-safe tracking without locks. Collected
/// over the process lifetime and logged on demand or at shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Sessions that acquired the session lock
    pub sessions_started: AtomicUsize,

    /// Sessions that reached Done
    pub sessions_succeeded: AtomicUsize,

    /// Sessions that reached Failed
    pub sessions_failed: AtomicUsize,

    /// Sessions aborted or timed out before execution
    pub sessions_aborted: AtomicUsize,

    /// Files extracted from an upstream
    pub files_extracted: AtomicU64,

    /// Files skipped because the upstream did not have them
    pub files_missing: AtomicU64,

    /// Slots restored during rollbacks
    pub slots_restored: AtomicU64,

    /// Engine start time
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_started: AtomicUsize::new(0),
            sessions_succeeded: AtomicUsize::new(0),
            sessions_failed: AtomicUsize::new(0),
            sessions_aborted: AtomicUsize::new(0),
            files_extracted: AtomicU64::new(0),
            files_missing: AtomicU64::new(0),
            slots_restored: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_succeeded(&self) {
        self.sessions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_aborted(&self) {
        self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_extracted(&self) {
        self.files_extracted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_missing(&self) {
        self.files_missing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slots_restored(&self, count: u64) {
        self.slots_restored.fetch_add(count, Ordering::Relaxed);
    }

    /// Log a one-shot summary of everything counted so far.
    pub fn log_summary(&self) {
        tracing::info!(
            "Sessions: {} started, {} succeeded, {} failed, {} aborted (uptime {:.0}s)",
            self.sessions_started.load(Ordering::Relaxed),
            self.sessions_succeeded.load(Ordering::Relaxed),
            self.sessions_failed.load(Ordering::Relaxed),
            self.sessions_aborted.load(Ordering::Relaxed),
            self.start_time.elapsed().as_secs_f64()
        );
        tracing::info!(
            "Files: {} extracted, {} missing from upstream, {} slots restored",
            self.files_extracted.load(Ordering::Relaxed),
            self.files_missing.load(Ordering::Relaxed),
            self.slots_restored.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
