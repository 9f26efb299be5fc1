//! Execution metrics: per-operation counters and call latency.
//!
//! All recording is lock-free; [`ExecutionMetrics::snapshot`] produces a
//! serializable point-in-time view.

mod latency;

pub use latency::{LatencyHistogram, LatencySummary, LATENCY_BUCKETS_US};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::execution::Operation;

#[derive(Debug, Default)]
struct OperationCounters {
    calls: AtomicU64,
    failures: AtomicU64,
}

/// Metrics of one query service.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    operations: [OperationCounters; Operation::ALL.len()],
    rows: AtomicU64,
    fetch_expansions: AtomicU64,
    latency: LatencyHistogram,
}

impl ExecutionMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed top-level call.
    pub fn record_call(&self, operation: Operation, elapsed: Duration, rows: usize, ok: bool) {
        let counters = &self.operations[operation.index()];
        counters.calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.rows.fetch_add(rows as u64, Ordering::Relaxed);
        self.latency
            .observe(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
    }

    /// Record one fetch query expansion.
    pub fn record_fetch_expansion(&self) {
        self.fetch_expansions.fetch_add(1, Ordering::Relaxed);
    }

    /// Calls of `operation`.
    pub fn calls(&self, operation: Operation) -> u64 {
        self.operations[operation.index()].calls.load(Ordering::Relaxed)
    }

    /// Failed calls of `operation`.
    pub fn failures(&self, operation: Operation) -> u64 {
        self.operations[operation.index()]
            .failures
            .load(Ordering::Relaxed)
    }

    /// Fetch query expansions performed.
    pub fn fetch_expansions(&self) -> u64 {
        self.fetch_expansions.load(Ordering::Relaxed)
    }

    /// Rows returned by top-level calls.
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    /// Call latency histogram.
    pub fn latency(&self) -> &LatencyHistogram {
        &self.latency
    }

    /// Point-in-time snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let operations = Operation::ALL
            .iter()
            .map(|&op| {
                (
                    op.to_string(),
                    OperationSnapshot {
                        calls: self.calls(op),
                        failures: self.failures(op),
                    },
                )
            })
            .collect();
        MetricsSnapshot {
            operations,
            rows: self.rows(),
            fetch_expansions: self.fetch_expansions(),
            latency: self.latency.summary(),
        }
    }
}

/// Counters of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationSnapshot {
    pub calls: u64,
    pub failures: u64,
}

/// Serializable view of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub operations: BTreeMap<String, OperationSnapshot>,
    pub rows: u64,
    pub fetch_expansions: u64,
    pub latency: LatencySummary,
}
