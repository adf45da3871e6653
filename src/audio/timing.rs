//! Callback interval statistics
//!
//! Audio callbacks record when they run; a reporting thread periodically
//! takes a summary. Everything is atomics so recording is safe in a
//! real-time callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Summary of the intervals between recorded calls
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallReport {
    /// Number of intervals measured
    pub calls: u64,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl CallReport {
    /// Average call rate in Hz
    pub fn frequency(&self) -> f64 {
        let mean = self.mean.as_secs_f64();
        if mean > 0.0 { 1.0 / mean } else { 0.0 }
    }
}

pub struct CallStats {
    epoch: Instant,
    /// Time of the previous call plus one, so zero means "never called"
    last_ns: AtomicU64,
    calls: AtomicU64,
    total_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl CallStats {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ns: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }

    /// Record a call happening now
    pub fn record(&self) {
        let now = self.epoch.elapsed().as_nanos() as u64 + 1;
        let previous = self.last_ns.swap(now, Ordering::Relaxed);
        if previous == 0 {
            return;
        }

        let interval = now.saturating_sub(previous);
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(interval, Ordering::Relaxed);
        self.min_ns.fetch_min(interval, Ordering::Relaxed);
        self.max_ns.fetch_max(interval, Ordering::Relaxed);
    }

    /// Summarise and reset the intervals recorded so far
    ///
    /// Returns `None` when fewer than two calls were recorded.
    pub fn take_report(&self) -> Option<CallReport> {
        let calls = self.calls.swap(0, Ordering::Relaxed);
        let total = self.total_ns.swap(0, Ordering::Relaxed);
        let min = self.min_ns.swap(u64::MAX, Ordering::Relaxed);
        let max = self.max_ns.swap(0, Ordering::Relaxed);
        if calls == 0 {
            return None;
        }

        Some(CallReport {
            calls,
            mean: Duration::from_nanos(total / calls),
            min: Duration::from_nanos(min.min(max)),
            max: Duration::from_nanos(max),
        })
    }
}

impl Default for CallStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_no_report_before_two_calls() {
        let stats = CallStats::new();
        assert!(stats.take_report().is_none());
        stats.record();
        assert!(stats.take_report().is_none());
    }

    #[test]
    fn test_report_covers_intervals() {
        let stats = CallStats::new();
        stats.record();
        thread::sleep(Duration::from_millis(5));
        stats.record();
        thread::sleep(Duration::from_millis(15));
        stats.record();

        let report = stats.take_report().unwrap();
        assert_eq!(report.calls, 2);
        assert!(report.min >= Duration::from_millis(5));
        assert!(report.max >= Duration::from_millis(15));
        assert!(report.min <= report.mean && report.mean <= report.max);
        assert!(report.frequency() > 0.0);

        // Reset, but the next call still measures from the last one
        assert!(stats.take_report().is_none());
        stats.record();
        assert_eq!(stats.take_report().unwrap().calls, 1);
    }
}
