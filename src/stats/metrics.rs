//! Per-test metric values
//!
//! Computed from a recorder entry's histogram and counters, then handed to
//! publishers.

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::TestId;

/// Latency percentiles in milliseconds (p50, p90, p95, p99, p999)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    /// 50th percentile (median)
    pub p50: u64,
    /// 90th percentile
    pub p90: u64,
    /// 95th percentile
    pub p95: u64,
    /// 99th percentile
    pub p99: u64,
    /// 99.9th percentile
    pub p999: u64,
}

impl Percentiles {
    /// Read percentiles from a duration histogram
    pub fn from_histogram(histogram: &Histogram<u64>) -> Self {
        if histogram.is_empty() {
            return Self::default();
        }

        Self {
            p50: histogram.value_at_quantile(0.50),
            p90: histogram.value_at_quantile(0.90),
            p95: histogram.value_at_quantile(0.95),
            p99: histogram.value_at_quantile(0.99),
            p999: histogram.value_at_quantile(0.999),
        }
    }

    /// Format as table row
    pub fn format_row(&self) -> String {
        format!(
            "{:>8} {:>8} {:>8} {:>8} {:>8}",
            self.p50, self.p90, self.p95, self.p99, self.p999
        )
    }
}

/// Aggregated result for one test
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub test: Option<TestId>,
    pub name: String,
    /// Timed (passed) executions
    pub total_runs: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Failure kind -> occurrences
    pub failures: BTreeMap<String, u64>,
    pub min_ms: u64,
    pub max_ms: u64,
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub percentiles: Percentiles,
    /// Executions per second over the measured window
    pub throughput: f64,
    pub last_observed: Option<DateTime<Utc>>,
}

impl MetricResult {
    pub fn from_histogram(
        test: TestId,
        name: impl Into<String>,
        histogram: &Histogram<u64>,
        elapsed: Duration,
    ) -> Self {
        let total_runs = histogram.len();
        let (min_ms, max_ms, mean_ms, std_dev_ms) = if total_runs > 0 {
            (
                histogram.min(),
                histogram.max(),
                histogram.mean(),
                histogram.stdev(),
            )
        } else {
            (0, 0, 0.0, 0.0)
        };

        Self {
            test: Some(test),
            name: name.into(),
            total_runs,
            min_ms,
            max_ms,
            mean_ms,
            std_dev_ms,
            percentiles: Percentiles::from_histogram(histogram),
            ..Default::default()
        }
        .with_throughput(elapsed)
    }

    fn with_throughput(mut self, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        self.throughput = if secs > 0.0 {
            self.total_runs as f64 / secs
        } else {
            0.0
        };
        self
    }

    /// Every execution, whatever its outcome
    pub fn executions(&self) -> u64 {
        self.passed + self.failed + self.skipped
    }

    /// Failures not caused by the engine interrupting a test
    pub fn target_failures(&self) -> u64 {
        self.failures
            .iter()
            .filter(|(kind, _)| kind.as_str() != crate::models::FailureCause::INTERRUPTED)
            .map(|(_, n)| n)
            .sum()
    }

    /// Format as summary string
    pub fn format_summary(&self) -> String {
        format!(
            "{}: runs={} fail={} skip={} min={}ms max={}ms mean={:.2}ms p95={}ms p99={}ms rps={:.1}",
            self.name,
            self.total_runs,
            self.failed,
            self.skipped,
            self.min_ms,
            self.max_ms,
            self.mean_ms,
            self.percentiles.p95,
            self.percentiles.p99,
            self.throughput
        )
    }
}
