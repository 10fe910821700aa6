//! Progress tracking for a run (pages done, failures, rate, ETA).
//!
//! The total is unknown until the download stage meets the first page that is
//! not already on disk; a fully resumed run never starts a progress display.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use crate::sequencer::pages_from;

/// Snapshot of run progress (CLI-friendly).
#[derive(Debug, Clone, Default)]
pub struct ProgressStats {
    /// Pages seen by the aggregator, whatever their outcome.
    pub pages_done: u64,
    /// Expected page count, once known.
    pub pages_total: Option<u64>,
    /// Pages that were already on disk.
    pub skipped: u64,
    pub fetch_failures: u64,
    pub save_failures: u64,
    /// Elapsed time since the tracker was created (seconds).
    pub elapsed_secs: f64,
}

impl ProgressStats {
    /// Pages per second (0 if elapsed is 0).
    pub fn pages_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.pages_done as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if total unknown or rate is 0).
    pub fn eta_secs(&self) -> Option<f64> {
        let total = self.pages_total?;
        let remaining = total.saturating_sub(self.pages_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.pages_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0]; 0 while the total is unknown.
    pub fn fraction(&self) -> f64 {
        match self.pages_total {
            Some(0) => 1.0,
            Some(total) => (self.pages_done as f64 / total as f64).min(1.0),
            None => 0.0,
        }
    }
}

/// Shared counters updated by the download stage and the aggregator.
#[derive(Debug)]
pub struct ProgressTracker {
    total: OnceLock<u64>,
    done: AtomicU64,
    skipped: AtomicU64,
    fetch_failures: AtomicU64,
    save_failures: AtomicU64,
    started: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            total: OnceLock::new(),
            done: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Fix the total on the first page that needs a fetch: pages already
    /// passed over plus the pages left from `page_id`. Later calls are no-ops.
    /// Returns true on the call that set it.
    pub fn begin(&self, passed_over: u64, page_id: u64, page_size: u64) -> bool {
        let total = passed_over + pages_from(page_id, page_size);
        let mut first = false;
        self.total.get_or_init(|| {
            first = true;
            total
        });
        if first {
            tracing::info!(total, first_page = page_id, "first missing page, progress started");
        }
        first
    }

    pub fn is_started(&self) -> bool {
        self.total.get().is_some()
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save_failure(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Advance the per-page counter; returns the new count.
    pub fn advance(&self) -> u64 {
        self.done.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> ProgressStats {
        ProgressStats {
            pages_done: self.done.load(Ordering::Relaxed),
            pages_total: self.total.get().copied(),
            skipped: self.skipped.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}
