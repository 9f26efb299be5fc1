//! Lock-free latency histogram.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Upper bucket bounds in microseconds; larger values land in an overflow bucket.
pub const LATENCY_BUCKETS_US: [u64; 10] = [
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 5_000_000,
];

/// Fixed-bucket latency histogram.
#[derive(Debug)]
pub struct LatencyHistogram {
    counts: [AtomicU64; LATENCY_BUCKETS_US.len() + 1],
    sum: AtomicU64,
    count: AtomicU64,
    max: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }
}

impl LatencyHistogram {
    /// Create an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a duration in microseconds.
    pub fn observe(&self, micros: u64) {
        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max.fetch_max(micros, Ordering::Relaxed);

        let bucket = LATENCY_BUCKETS_US
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(LATENCY_BUCKETS_US.len());
        self.counts[bucket].fetch_add(1, Ordering::Relaxed);
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean in microseconds.
    pub fn mean(&self) -> u64 {
        match self.count() {
            0 => 0,
            n => self.sum.load(Ordering::Relaxed) / n,
        }
    }

    /// Largest observation.
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Upper bound of the bucket holding quantile `q` (0.0 to 1.0).
    ///
    /// Observations in the overflow bucket report the largest observation.
    pub fn quantile(&self, q: f64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }
        let target = ((total as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;

        let mut seen = 0;
        for (i, count) in self.counts.iter().enumerate() {
            seen += count.load(Ordering::Relaxed);
            if seen >= target {
                return LATENCY_BUCKETS_US.get(i).copied().unwrap_or_else(|| self.max());
            }
        }
        self.max()
    }

    /// Point-in-time summary.
    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            mean_us: self.mean(),
            p50_us: self.quantile(0.50),
            p99_us: self.quantile(0.99),
            max_us: self.max(),
        }
    }
}

/// Serializable latency summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let hist = LatencyHistogram::new();
        assert_eq!(hist.summary(), LatencySummary::default());
    }

    #[test]
    fn test_quantiles() {
        let hist = LatencyHistogram::new();
        for _ in 0..98 {
            hist.observe(80);
        }
        hist.observe(4_000);
        hist.observe(9_000_000);

        assert_eq!(hist.count(), 100);
        assert_eq!(hist.quantile(0.5), 100);
        assert_eq!(hist.quantile(0.99), 5_000);
        assert_eq!(hist.quantile(1.0), 9_000_000);
        assert_eq!(hist.max(), 9_000_000);
    }
}
