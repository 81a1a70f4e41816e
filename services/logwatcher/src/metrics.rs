//! Per-dispatcher throughput metrics.
//!
//! Monotonic totals plus trailing-window timestamp lists for rate
//! reporting.  Both reads and writes prune entries that fell out of the
//! window, so the lists stay bounded even on an idle status page.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Inner {
    total_lines: u64,
    total_matching: u64,
    matching_nanos: u128,
    line_times: VecDeque<Instant>,
    match_times: VecDeque<Instant>,
}

/// Counters for one dispatcher.
#[derive(Debug)]
pub struct MetricsCollector {
    started: Instant,
    window: Duration,
    inner: Mutex<Inner>,
}

/// A point-in-time reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Lines seen in the trailing window, scaled to per-minute.
    pub lines_per_minute: f64,
    /// Parser matches in the trailing window, scaled to per-minute.
    pub matching_per_minute: f64,
    /// Cumulative average handler latency, milliseconds.
    pub avg_match_latency_ms: f64,
    pub total_lines: u64,
    pub total_matching_lines: u64,
    pub uptime_seconds: u64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        MetricsCollector::new(DEFAULT_WINDOW)
    }
}

impl MetricsCollector {
    pub fn new(window: Duration) -> Self {
        MetricsCollector {
            started: Instant::now(),
            window: window.max(Duration::from_secs(1)),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn record_line(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.total_lines += 1;
        inner.line_times.push_back(now);
        prune(&mut inner.line_times, now, self.window);
    }

    pub fn record_match(&self, latency: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.total_matching += 1;
        inner.matching_nanos += latency.as_nanos();
        inner.match_times.push_back(now);
        prune(&mut inner.match_times, now, self.window);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        prune(&mut inner.line_times, now, self.window);
        prune(&mut inner.match_times, now, self.window);
        let scale = 60.0 / self.window.as_secs_f64();
        let avg_match_latency_ms = if inner.total_matching == 0 {
            0.0
        } else {
            inner.matching_nanos as f64 / inner.total_matching as f64 / 1_000_000.0
        };
        MetricsSnapshot {
            lines_per_minute: inner.line_times.len() as f64 * scale,
            matching_per_minute: inner.match_times.len() as f64 * scale,
            avg_match_latency_ms,
            total_lines: inner.total_lines,
            total_matching_lines: inner.total_matching,
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

fn prune(times: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = times.front() {
        if now.duration_since(front) > window {
            times.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_and_rates_count_recorded_activity() {
        let metrics = MetricsCollector::new(Duration::from_secs(60));
        for _ in 0..6 {
            metrics.record_line();
        }
        metrics.record_match(Duration::from_millis(2));
        metrics.record_match(Duration::from_millis(4));
        let snap = metrics.snapshot();
        assert_eq!(snap.total_lines, 6);
        assert_eq!(snap.total_matching_lines, 2);
        assert!((snap.lines_per_minute - 6.0).abs() < f64::EPSILON);
        assert!((snap.avg_match_latency_ms - 3.0).abs() < 0.01);
    }

    #[test]
    fn window_scaling_converts_to_per_minute() {
        let metrics = MetricsCollector::new(Duration::from_secs(30));
        metrics.record_line();
        let snap = metrics.snapshot();
        // One entry in a 30 s window reads as two per minute.
        assert!((snap.lines_per_minute - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn old_entries_fall_out_of_the_window_but_totals_remain() {
        let metrics = MetricsCollector::new(Duration::from_secs(1));
        metrics.record_line();
        std::thread::sleep(Duration::from_millis(1100));
        let snap = metrics.snapshot();
        assert_eq!(snap.total_lines, 1);
        assert!((snap.lines_per_minute - 0.0).abs() < f64::EPSILON);
    }
}
