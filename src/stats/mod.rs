//! Statistics recording and metric computation
//!
//! Workers record outcomes into local recorders; the aggregator drains
//! them into a global one and computes per-test metrics for publishing.

mod metrics;
mod run_map;

pub use metrics::{MetricResult, Percentiles};
pub use run_map::{EntryStats, RunMap, TestEntry};
