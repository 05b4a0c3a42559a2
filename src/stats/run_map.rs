//! Statistics recorder
//!
//! A `RunMap` holds one entry per test. Each entry has its own lock, so
//! workers recording different tests never contend; the structural lock is
//! only taken exclusively while entries are created or while one recorder
//! is drained into another.

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::metrics::MetricResult;
use crate::models::{Outcome, TestId, TestUnit};

/// Highest duration tracked by the histogram (one hour, in ms)
const MAX_TRACKED_MS: u64 = 3_600_000;

/// Significant figures kept by the histogram
const HISTOGRAM_PRECISION: u8 = 3;

static NEXT_RECORDER_ID: AtomicU64 = AtomicU64::new(0);

fn new_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(1, MAX_TRACKED_MS, HISTOGRAM_PRECISION)
        .expect("histogram bounds are constant and valid")
}

/// Counters and durations for one test
#[derive(Clone, Debug)]
pub struct EntryStats {
    histogram: Histogram<u64>,
    passed: u64,
    failed: u64,
    skipped: u64,
    failures: BTreeMap<String, u64>,
    last_observed: Option<DateTime<Utc>>,
}

impl Default for EntryStats {
    fn default() -> Self {
        Self {
            histogram: new_histogram(),
            passed: 0,
            failed: 0,
            skipped: 0,
            failures: BTreeMap::new(),
            last_observed: None,
        }
    }
}

impl EntryStats {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Passed(elapsed) => {
                self.histogram.saturating_record(elapsed.as_millis() as u64);
                self.passed += 1;
            }
            Outcome::Failed(cause) => {
                self.failed += 1;
                *self.failures.entry(cause.kind.clone()).or_default() += 1;
            }
            Outcome::Skipped(_) => self.skipped += 1,
        }
        self.last_observed = Some(Utc::now());
    }

    fn merge(&mut self, other: &EntryStats) {
        if let Err(e) = self.histogram.add(&other.histogram) {
            warn!("Failed to merge duration histogram: {}", e);
        }
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        for (kind, n) in &other.failures {
            *self.failures.entry(kind.clone()).or_default() += n;
        }
        self.last_observed = self.last_observed.max(other.last_observed);
    }

    fn reset(&mut self) {
        self.histogram.reset();
        self.passed = 0;
        self.failed = 0;
        self.skipped = 0;
        self.failures.clear();
        self.last_observed = None;
    }

    /// Timed (successful) executions
    pub fn total_runs(&self) -> u64 {
        self.histogram.len()
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn executions(&self) -> u64 {
        self.passed + self.failed + self.skipped
    }

    pub fn min(&self) -> u64 {
        if self.histogram.is_empty() {
            0
        } else {
            self.histogram.min()
        }
    }

    pub fn max(&self) -> u64 {
        self.histogram.max()
    }

    pub fn mean(&self) -> f64 {
        self.histogram.mean()
    }

    pub fn percentile(&self, percentile: f64) -> u64 {
        self.histogram.value_at_percentile(percentile)
    }

    pub fn failures(&self) -> &BTreeMap<String, u64> {
        &self.failures
    }

    pub fn last_observed(&self) -> Option<DateTime<Utc>> {
        self.last_observed
    }

    fn to_metric(&self, test: TestId, name: &str, elapsed: Duration) -> MetricResult {
        let mut result = MetricResult::from_histogram(test, name, &self.histogram, elapsed);
        result.passed = self.passed;
        result.failed = self.failed;
        result.skipped = self.skipped;
        result.failures = self.failures.clone();
        result.last_observed = self.last_observed;
        result
    }
}

/// Statistics for one logical test
#[derive(Debug)]
pub struct TestEntry {
    test: TestId,
    name: String,
    stats: Mutex<EntryStats>,
}

impl TestEntry {
    fn new(test: TestId, name: impl Into<String>) -> Self {
        Self {
            test,
            name: name.into(),
            stats: Mutex::new(EntryStats::default()),
        }
    }

    pub fn test(&self) -> TestId {
        self.test
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy of the current counters
    pub fn stats(&self) -> EntryStats {
        self.stats.lock().clone()
    }
}

#[derive(Default)]
struct EntryTable {
    order: Vec<Arc<TestEntry>>,
    by_id: HashMap<TestId, Arc<TestEntry>>,
}

impl EntryTable {
    fn get_or_insert(&mut self, test: TestId, name: &str) -> Arc<TestEntry> {
        if let Some(entry) = self.by_id.get(&test) {
            return entry.clone();
        }
        let entry = Arc::new(TestEntry::new(test, name));
        self.order.push(entry.clone());
        self.by_id.insert(test, entry.clone());
        entry
    }
}

/// Thread-safe per-test statistics recorder
pub struct RunMap {
    id: u64,
    table: RwLock<EntryTable>,
}

impl RunMap {
    pub fn new() -> Self {
        Self {
            id: NEXT_RECORDER_ID.fetch_add(1, Ordering::Relaxed),
            table: RwLock::new(EntryTable::default()),
        }
    }

    /// Recorder pre-populated with `tests` (and their children) in order
    pub fn for_tests(tests: &[TestUnit]) -> Self {
        let map = Self::new();
        for test in tests {
            map.add_test(test);
        }
        map
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Make sure `unit` and its children have entries
    pub fn add_test(&self, unit: &TestUnit) {
        self.entry(unit.id(), unit.name());
        for child in unit.children() {
            self.add_test(child);
        }
    }

    fn entry(&self, test: TestId, name: &str) -> Arc<TestEntry> {
        if let Some(entry) = self.table.read().by_id.get(&test) {
            return entry.clone();
        }
        self.table.write().get_or_insert(test, name)
    }

    /// Record one outcome for a test
    pub fn record(&self, test: TestId, name: &str, outcome: &Outcome) {
        let entry = self.entry(test, name);
        entry.stats.lock().record(outcome);
    }

    pub fn record_unit(&self, unit: &TestUnit, outcome: &Outcome) {
        self.record(unit.id(), unit.name(), outcome);
    }

    /// Fold every entry of `other` into this recorder and reset it in `other`.
    ///
    /// Returns the number of executions folded per test.
    pub fn aggregate_and_reinitialize(&self, other: &RunMap) -> HashMap<TestId, u64> {
        let mut folded = HashMap::new();
        if self.id == other.id {
            return folded;
        }

        // Lower id first so two concurrent drains can't deadlock
        let (mut mine, theirs) = if self.id < other.id {
            let mine = self.table.write();
            let theirs = other.table.write();
            (mine, theirs)
        } else {
            let theirs = other.table.write();
            let mine = self.table.write();
            (mine, theirs)
        };

        for source in &theirs.order {
            let target = mine.get_or_insert(source.test, &source.name);
            let mut source_stats = source.stats.lock();
            target.stats.lock().merge(&source_stats);
            folded.insert(source.test, source_stats.executions());
            source_stats.reset();
        }

        folded
    }

    /// Copy of one test's counters
    pub fn stats(&self, test: TestId) -> Option<EntryStats> {
        self.table.read().by_id.get(&test).map(|e| e.stats())
    }

    /// Copy of one test's counters by name
    pub fn stats_by_name(&self, name: &str) -> Option<EntryStats> {
        self.table
            .read()
            .order
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.stats())
    }

    /// Metric values for every test, in insertion order
    pub fn metrics(&self, elapsed: Duration) -> Vec<MetricResult> {
        let entries: Vec<Arc<TestEntry>> = self.table.read().order.clone();
        entries
            .iter()
            .map(|e| e.stats.lock().to_metric(e.test, &e.name, elapsed))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.table
            .read()
            .order
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn total_executions(&self) -> u64 {
        let entries: Vec<Arc<TestEntry>> = self.table.read().order.clone();
        entries.iter().map(|e| e.stats.lock().executions()).sum()
    }
}

impl Default for RunMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureCause;
    use std::thread;

    fn passed(ms: u64) -> Outcome {
        Outcome::Passed(Duration::from_millis(ms))
    }

    fn failed(kind: &str) -> Outcome {
        Outcome::Failed(FailureCause::new(kind, "boom"))
    }

    #[test]
    fn test_record_routes_outcomes() {
        let map = RunMap::new();
        let id = TestId::new();

        map.record(id, "Home", &passed(10));
        map.record(id, "Home", &failed("http_status"));
        map.record(id, "Home", &failed("http_status"));
        map.record(id, "Home", &Outcome::Skipped("no data".into()));

        let stats = map.stats(id).unwrap();
        assert_eq!(stats.total_runs(), 1);
        assert_eq!(stats.failed(), 2);
        assert_eq!(stats.skipped(), 1);
        assert_eq!(stats.failures().get("http_status"), Some(&2));
        assert!(stats.last_observed().is_some());
    }

    #[test]
    fn test_aggregation_correctness() {
        let a = RunMap::new();
        let b = RunMap::new();
        let id = TestId::new();

        for ms in [10, 20, 30] {
            a.record(id, "Search", &passed(ms));
        }
        b.record(id, "Search", &passed(5));
        b.record(id, "Search", &failed("connection"));
        b.record(id, "Search", &Outcome::Skipped("skip".into()));

        let folded = a.aggregate_and_reinitialize(&b);
        assert_eq!(folded.get(&id), Some(&3));

        let merged = a.stats(id).unwrap();
        assert_eq!(merged.total_runs(), 4);
        assert_eq!(merged.failed(), 1);
        assert_eq!(merged.skipped(), 1);
        assert_eq!(merged.min(), 5);
        assert_eq!(merged.max(), 30);

        let drained = b.stats(id).unwrap();
        assert_eq!(drained.total_runs(), 0);
        assert_eq!(drained.failed(), 0);
        assert_eq!(drained.skipped(), 0);
        assert!(drained.failures().is_empty());
    }

    #[test]
    fn test_aggregation_idempotent_on_empty() {
        let a = RunMap::new();
        let b = RunMap::new();
        let id = TestId::new();

        b.record(id, "Login", &passed(7));
        b.record(id, "Login", &failed("timeout"));
        a.aggregate_and_reinitialize(&b);
        let before = a.metrics(Duration::from_secs(1));

        let folded = a.aggregate_and_reinitialize(&b);
        assert_eq!(folded.get(&id), Some(&0));
        assert_eq!(a.metrics(Duration::from_secs(1)), before);
    }

    #[test]
    fn test_aggregation_creates_missing_entries_in_order() {
        let global = RunMap::new();
        let worker = RunMap::new();
        let (first, second) = (TestId::new(), TestId::new());

        worker.record(first, "First", &passed(1));
        worker.record(second, "Second", &passed(1));
        global.aggregate_and_reinitialize(&worker);

        assert_eq!(global.names(), vec!["First", "Second"]);
    }

    #[test]
    fn test_self_aggregation_is_noop() {
        let map = RunMap::new();
        let id = TestId::new();
        map.record(id, "Only", &passed(3));
        assert!(map.aggregate_and_reinitialize(&map).is_empty());
        assert_eq!(map.stats(id).unwrap().total_runs(), 1);
    }

    #[test]
    fn test_concurrent_record_and_drain_counts_once() {
        let global = Arc::new(RunMap::new());
        let worker = Arc::new(RunMap::new());
        let id = TestId::new();

        let recorder = {
            let worker = worker.clone();
            thread::spawn(move || {
                for i in 0..20_000u64 {
                    worker.record(id, "Hot", &passed(i % 50 + 1));
                }
            })
        };

        let drainer = {
            let global = global.clone();
            let worker = worker.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    global.aggregate_and_reinitialize(&worker);
                }
            })
        };

        recorder.join().unwrap();
        drainer.join().unwrap();
        global.aggregate_and_reinitialize(&worker);

        assert_eq!(global.stats(id).unwrap().total_runs(), 20_000);
        assert_eq!(worker.stats(id).unwrap().total_runs(), 0);
    }

    #[test]
    fn test_metrics_include_breakdown() {
        let map = RunMap::new();
        let id = TestId::new();
        map.record(id, "Checkout", &passed(40));
        map.record(id, "Checkout", &failed("interrupted"));

        let metrics = map.metrics(Duration::from_secs(2));
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].passed, 1);
        assert_eq!(metrics[0].failures.get("interrupted"), Some(&1));
        assert_eq!(metrics[0].target_failures(), 0);
    }
}
