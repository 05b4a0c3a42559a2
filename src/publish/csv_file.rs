//! CSV publisher
//!
//! One row per test for every publish call.

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use super::Publisher;
use crate::stats::MetricResult;

#[derive(Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    phase: &'a str,
    kind: &'a str,
    test: &'a str,
    total_runs: u64,
    failed: u64,
    skipped: u64,
    min_ms: u64,
    max_ms: u64,
    mean_ms: f64,
    p50_ms: u64,
    p90_ms: u64,
    p99_ms: u64,
    throughput: f64,
}

/// Writes metrics to a CSV file
pub struct CsvPublisher {
    writer: Mutex<csv::Writer<File>>,
}

impl CsvPublisher {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = csv::Writer::from_path(path)?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    fn write_rows(&self, phase: &str, kind: &str, results: &[MetricResult]) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        let mut writer = self.writer.lock();
        for result in results {
            writer.serialize(CsvRow {
                timestamp: timestamp.clone(),
                phase,
                kind,
                test: &result.name,
                total_runs: result.total_runs,
                failed: result.failed,
                skipped: result.skipped,
                min_ms: result.min_ms,
                max_ms: result.max_ms,
                mean_ms: result.mean_ms,
                p50_ms: result.percentiles.p50,
                p90_ms: result.percentiles.p90,
                p99_ms: result.percentiles.p99,
                throughput: result.throughput,
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Publisher for CsvPublisher {
    fn name(&self) -> &str {
        "csv"
    }

    fn publish_intermediate(&self, phase: &str, results: &[MetricResult]) -> Result<()> {
        self.write_rows(phase, "intermediate", results)
    }

    fn publish_final(&self, phase: &str, results: &[MetricResult]) -> Result<()> {
        self.write_rows(phase, "final", results)
    }

    fn finish(&self) {
        let _ = self.writer.lock().flush();
    }
}
