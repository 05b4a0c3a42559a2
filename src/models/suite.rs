//! Test suites
//!
//! An ordered, weighted collection of test units. Reads (weighted draws)
//! take the shared lock; removals take the exclusive one so a reader always
//! sees the member list and the total weight agree.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use super::test_unit::{TestId, TestUnit};

/// Suite mutation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SuiteError {
    #[error("Duplicate test name '{0}' in suite")]
    DuplicateName(String),

    #[error("Test '{0}' must have a positive weight")]
    ZeroWeight(String),
}

#[derive(Default)]
struct SuiteInner {
    tests: Vec<TestUnit>,
    index: HashMap<String, TestId>,
    total_weight: u64,
}

/// Ordered collection of test units with a cached total weight
pub struct TestSuite {
    name: String,
    inner: RwLock<SuiteInner>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(SuiteInner::default()),
        }
    }

    /// Build a suite from units, keeping their order
    pub fn with_tests(name: impl Into<String>, tests: Vec<TestUnit>) -> Result<Self, SuiteError> {
        let suite = Self::new(name);
        for test in tests {
            suite.add(test)?;
        }
        Ok(suite)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a unit
    pub fn add(&self, unit: TestUnit) -> Result<(), SuiteError> {
        if unit.weight() == 0 {
            return Err(SuiteError::ZeroWeight(unit.name().to_string()));
        }

        let mut inner = self.inner.write();
        if inner.index.contains_key(unit.name()) {
            return Err(SuiteError::DuplicateName(unit.name().to_string()));
        }

        inner.total_weight += u64::from(unit.weight());
        inner.index.insert(unit.name().to_string(), unit.id());
        inner.tests.push(unit);
        Ok(())
    }

    /// Remove a unit by identity
    pub fn remove(&self, id: TestId) -> Option<TestUnit> {
        self.remove_if(id, |_| true)
    }

    /// Remove a unit under the exclusive lock, only if `still_valid` agrees
    /// once the lock is held
    pub fn remove_if(&self, id: TestId, still_valid: impl FnOnce(&TestUnit) -> bool) -> Option<TestUnit> {
        let mut inner = self.inner.write();
        let position = inner.tests.iter().position(|t| t.id() == id)?;
        if !still_valid(&inner.tests[position]) {
            return None;
        }

        let unit = inner.tests.remove(position);
        inner.total_weight -= u64::from(unit.weight());
        inner.index.remove(unit.name());
        Some(unit)
    }

    /// Run `f` against a consistent view of the members and total weight
    pub fn draw<R>(&self, f: impl FnOnce(&[TestUnit], u64) -> R) -> R {
        let inner = self.inner.read();
        f(&inner.tests, inner.total_weight)
    }

    pub fn total_weight(&self) -> u64 {
        self.inner.read().total_weight
    }

    pub fn len(&self) -> usize {
        self.inner.read().tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().tests.is_empty()
    }

    pub fn contains(&self, id: TestId) -> bool {
        self.inner.read().tests.iter().any(|t| t.id() == id)
    }

    /// Look a unit up by name
    pub fn get(&self, name: &str) -> Option<TestUnit> {
        let inner = self.inner.read();
        let id = inner.index.get(name)?;
        inner.tests.iter().find(|t| t.id() == *id).cloned()
    }

    /// Snapshot of the members in suite order
    pub fn tests(&self) -> Vec<TestUnit> {
        self.inner.read().tests.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .tests
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Smallest effective timeout among the members
    pub fn min_timeout(&self, default: Duration) -> Option<Duration> {
        self.inner
            .read()
            .tests
            .iter()
            .map(|t| t.timeout_or(default))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionContext, TestAction, Verdict};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Nothing;

    #[async_trait]
    impl TestAction for Nothing {
        async fn execute(&self, _ctx: &ExecutionContext) -> Verdict {
            Verdict::Pass
        }
    }

    fn unit(name: &str, weight: u32) -> TestUnit {
        TestUnit::leaf(name, "noop", Arc::new(Nothing)).with_weight(weight)
    }

    #[test]
    fn test_total_weight_tracks_members() {
        let suite = TestSuite::new("default");
        let a = unit("A", 3);
        let b = unit("B", 7);
        let a_id = a.id();

        suite.add(a).unwrap();
        suite.add(b).unwrap();
        assert_eq!(suite.total_weight(), 10);

        assert!(suite.remove(a_id).is_some());
        assert_eq!(suite.total_weight(), 7);
        assert_eq!(suite.names(), vec!["B".to_string()]);
        assert!(suite.remove(a_id).is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let suite = TestSuite::new("default");
        suite.add(unit("A", 1)).unwrap();
        assert_eq!(
            suite.add(unit("A", 2)),
            Err(SuiteError::DuplicateName("A".to_string()))
        );
        assert_eq!(suite.total_weight(), 1);
    }

    #[test]
    fn test_zero_weight_rejected() {
        let suite = TestSuite::new("default");
        assert!(matches!(suite.add(unit("A", 0)), Err(SuiteError::ZeroWeight(_))));
    }

    #[test]
    fn test_insertion_order_and_lookup() {
        let suite =
            TestSuite::with_tests("s", vec![unit("C", 1), unit("A", 1), unit("B", 1)]).unwrap();
        assert_eq!(suite.names(), vec!["C", "A", "B"]);
        assert_eq!(suite.get("A").map(|t| t.weight()), Some(1));
        assert!(suite.get("Z").is_none());
    }

    #[test]
    fn test_remove_if_rechecks_under_lock() {
        let suite = TestSuite::new("s");
        let a = unit("A", 1);
        let id = a.id();
        suite.add(a).unwrap();

        assert!(suite.remove_if(id, |_| false).is_none());
        assert!(suite.contains(id));
        assert!(suite.remove_if(id, |_| true).is_some());
        assert!(suite.is_empty());
    }

    #[test]
    fn test_min_timeout() {
        let suite = TestSuite::new("s");
        suite
            .add(unit("A", 1).with_timeout(Some(Duration::from_millis(200))))
            .unwrap();
        suite.add(unit("B", 1)).unwrap();

        assert_eq!(
            suite.min_timeout(Duration::from_secs(5)),
            Some(Duration::from_millis(200))
        );
        assert_eq!(TestSuite::new("empty").min_timeout(Duration::from_secs(1)), None);
    }
}
