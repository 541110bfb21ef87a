//! Lightweight latency histogram shared by queue and market-quality instrumentation.
//!
//! Fixed log2-spaced buckets rather than a full digest; cheap enough to update on
//! every event without becoming the bottleneck it would be measuring.

use std::sync::atomic::{AtomicU64, Ordering};

const BUCKET_COUNT: usize = 32;

/// Records microsecond latencies into power-of-two buckets and derives percentiles.
pub struct LatencyHistogram {
    buckets: [AtomicU64; BUCKET_COUNT],
    count: AtomicU64,
    sum_us: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    fn bucket_for(value_us: u64) -> usize {
        if value_us == 0 {
            0
        } else {
            (64 - value_us.leading_zeros() as usize).min(BUCKET_COUNT - 1)
        }
    }

    pub fn record(&self, value_us: u64) {
        let idx = Self::bucket_for(value_us);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(value_us, Ordering::Relaxed);
    }

    fn percentile(&self, p: f64) -> u64 {
        let total = self.count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let target = ((total as f64) * p).ceil() as u64;
        let mut cumulative = 0u64;
        for (idx, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            if cumulative >= target.max(1) {
                return if idx == 0 { 0 } else { 1u64 << (idx - 1) };
            }
        }
        1u64 << (BUCKET_COUNT - 2)
    }

    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean_us(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            self.sum_us.load(Ordering::Relaxed) as f64 / count as f64
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reports_percentiles() {
        let hist = LatencyHistogram::new();
        for v in [1, 2, 4, 8, 16, 32, 64, 128] {
            hist.record(v);
        }
        assert_eq!(hist.count(), 8);
        assert!(hist.p50() > 0);
        assert!(hist.p99() >= hist.p50());
    }

    #[test]
    fn empty_histogram_reports_zero() {
        let hist = LatencyHistogram::new();
        assert_eq!(hist.p50(), 0);
        assert_eq!(hist.p99(), 0);
        assert_eq!(hist.mean_us(), 0.0);
    }
}
