//! Rolling-window delivery metrics and derived health.
//!
//! Counters are kept in a ring of fixed-width buckets covering the metrics
//! window (default 5 minutes). Writers stamp the current bucket; readers
//! sum the buckets still inside the window, so old traffic ages out without
//! a background task.

use std::time::Duration;

use courier_common::{HealthReport, HealthStatus, WindowMetrics};
use parking_lot::Mutex;
use tokio::time::Instant;

const BUCKET_COUNT: usize = 30;

/// Success-rate floor for a Healthy verdict.
const HEALTHY_MIN_RATE: f64 = 0.9;
/// Success-rate floor for a Degraded verdict; below is Unhealthy.
const DEGRADED_MIN_RATE: f64 = 0.7;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    period: u64,
    queued: u64,
    succeeded: u64,
    failed: u64,
    retried: u64,
    rate_limited: u64,
    dead_lettered: u64,
    duration_ms_sum: u64,
    duration_samples: u64,
}

pub struct MetricsAggregator {
    window: Duration,
    bucket_width_ms: u64,
    started: Instant,
    buckets: Mutex<[Bucket; BUCKET_COUNT]>,
}

impl MetricsAggregator {
    pub fn new(window: Duration) -> Self {
        let bucket_width_ms = (window.as_millis() as u64 / BUCKET_COUNT as u64).max(1);
        Self {
            window,
            bucket_width_ms,
            started: Instant::now(),
            buckets: Mutex::new([Bucket::default(); BUCKET_COUNT]),
        }
    }

    fn current_period(&self) -> u64 {
        self.started.elapsed().as_millis() as u64 / self.bucket_width_ms
    }

    fn with_current<F: FnOnce(&mut Bucket)>(&self, f: F) {
        let period = self.current_period();
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[(period % BUCKET_COUNT as u64) as usize];
        if bucket.period != period {
            *bucket = Bucket { period, ..Bucket::default() };
        }
        f(bucket);
    }

    pub fn record_queued(&self) {
        self.with_current(|b| b.queued += 1);
    }

    pub fn record_success(&self) {
        self.with_current(|b| b.succeeded += 1);
    }

    pub fn record_failure(&self) {
        self.with_current(|b| b.failed += 1);
    }

    pub fn record_retry(&self) {
        self.with_current(|b| b.retried += 1);
    }

    pub fn record_rate_limited(&self) {
        self.with_current(|b| b.rate_limited += 1);
    }

    pub fn record_dead_letter(&self) {
        self.with_current(|b| b.dead_lettered += 1);
    }

    /// Records the duration of a completed delivery attempt, successful or
    /// not, feeding the rolling average.
    pub fn record_attempt_duration(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.with_current(|b| {
            b.duration_ms_sum += ms;
            b.duration_samples += 1;
        });
    }

    /// Sums the buckets still inside the rolling window.
    pub fn snapshot(&self) -> WindowMetrics {
        let period = self.current_period();
        let buckets = self.buckets.lock();

        let mut totals = WindowMetrics { window_secs: self.window.as_secs(), ..Default::default() };
        let mut duration_ms_sum = 0u64;
        let mut duration_samples = 0u64;

        for bucket in buckets.iter() {
            let in_window = bucket.period <= period && bucket.period + BUCKET_COUNT as u64 > period;
            if !in_window {
                continue;
            }
            totals.queued += bucket.queued;
            totals.succeeded += bucket.succeeded;
            totals.failed += bucket.failed;
            totals.retried += bucket.retried;
            totals.rate_limited += bucket.rate_limited;
            totals.dead_lettered += bucket.dead_lettered;
            duration_ms_sum += bucket.duration_ms_sum;
            duration_samples += bucket.duration_samples;
        }

        if duration_samples > 0 {
            totals.avg_delivery_ms = duration_ms_sum as f64 / duration_samples as f64;
        }
        totals
    }

    /// Derives the health verdict from the rolling success rate. A window
    /// with no completed attempts reads as healthy.
    pub fn health_report(&self, issues: Vec<String>) -> HealthReport {
        let metrics = self.snapshot();
        let completed = metrics.succeeded + metrics.failed;
        let success_rate = if completed == 0 {
            1.0
        } else {
            metrics.succeeded as f64 / completed as f64
        };

        let status = if success_rate >= HEALTHY_MIN_RATE {
            HealthStatus::Healthy
        } else if success_rate >= DEGRADED_MIN_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport { status, success_rate, issues }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
