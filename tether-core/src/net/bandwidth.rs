//! Per-connection throughput and latency tracking.
//!
//! Records `(timestamp, bytes)` samples over a rolling window and
//! derives the current throughput in bytes/second, plus a smoothed RTT
//! from health-check round trips. The registry snapshots the result
//! into a [`PerformanceReport`] on each monitor tick.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

// ── BandwidthEstimator ───────────────────────────────────────────

/// Rolling-window bandwidth estimator.
pub struct BandwidthEstimator {
    /// Samples: `(when, bytes)`.
    samples: VecDeque<(Instant, u64)>,
    /// Window duration.
    window: Duration,
    /// Running total of bytes in the window.
    total_bytes: u64,
    /// Smoothed RTT in microseconds.
    smoothed_rtt_us: u64,
}

impl BandwidthEstimator {
    /// Create an estimator with a 1-second rolling window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    /// Create an estimator with a custom window duration.
    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(256),
            window,
            total_bytes: 0,
            smoothed_rtt_us: 0,
        }
    }

    /// Record that `bytes` were transmitted at the current instant.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    /// Record with an explicit timestamp (useful for testing).
    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.total_bytes += bytes;
        self.evict(when);
    }

    /// Update the smoothed RTT (exponential moving average, α = 0.125).
    pub fn record_rtt(&mut self, rtt: Duration) {
        let rtt_us = rtt.as_micros() as u64;
        if self.smoothed_rtt_us == 0 {
            self.smoothed_rtt_us = rtt_us;
        } else {
            // EWMA: srtt = 7/8 * srtt + 1/8 * sample
            self.smoothed_rtt_us = self.smoothed_rtt_us * 7 / 8 + rtt_us / 8;
        }
    }

    /// Estimated throughput in bytes/second over the rolling window.
    pub fn estimate_bps(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let elapsed = match (self.samples.front(), self.samples.back()) {
            (Some((first, _)), Some((last, _))) => {
                let d = last.duration_since(*first);
                if d.is_zero() {
                    Duration::from_millis(1)
                } else {
                    d
                }
            }
            _ => return 0,
        };
        let secs = elapsed.as_secs_f64();
        (self.total_bytes as f64 / secs) as u64
    }

    /// Smoothed round-trip time, or `Duration::ZERO` if not yet measured.
    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.smoothed_rtt_us)
    }

    /// Number of samples currently in the window.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Snapshot the current state into a report.
    pub fn report(&self) -> PerformanceReport {
        PerformanceReport {
            throughput_bps: self.estimate_bps(),
            rtt: self.latency(),
            sample_count: self.sample_count(),
            taken_at: Instant::now(),
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, bytes)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.total_bytes = self.total_bytes.saturating_sub(bytes);
            } else {
                break;
            }
        }
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ── PerformanceReport ────────────────────────────────────────────

/// Read-only link-quality snapshot, replaced wholesale per monitor
/// tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceReport {
    /// Estimated outbound throughput in bytes/second.
    pub throughput_bps: u64,
    /// Smoothed round-trip time.
    pub rtt: Duration,
    /// Samples backing the throughput estimate.
    pub sample_count: usize,
    /// When the snapshot was taken.
    pub taken_at: Instant,
}

// ── Tests ────────────────────────────────────────────────────────
