//! Phases
//!
//! A phase is a named slice of a configuration: a suite, a run mode, a
//! publish mode and a duration. It is also the unit of work shipped to
//! agents, so it has a serializable form.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::suite::{SuiteError, TestSuite};
use super::test_unit::{TestSpec, TestUnit};
use crate::engine::{ExecutionCounts, RunMode};
use crate::publish::PublishMode;
use crate::registry::{RegistryError, TestRegistry};

/// Errors building a phase from its spec
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("Phase '{phase}': {source}")]
    Registry {
        phase: String,
        #[source]
        source: RegistryError,
    },

    #[error("Phase '{phase}': {source}")]
    Suite {
        phase: String,
        #[source]
        source: SuiteError,
    },
}

fn default_measurable() -> bool {
    true
}

/// Serializable description of a phase
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,

    /// Whether results of this phase are published
    #[serde(default = "default_measurable")]
    pub measurable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,

    #[serde(default)]
    pub tests: Vec<TestSpec>,

    #[serde(default)]
    pub run_mode: RunMode,

    #[serde(default)]
    pub publish_mode: PublishMode,

    /// Executions already done per test name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counts: BTreeMap<String, u64>,
}

impl PhaseSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measurable: true,
            duration_secs: None,
            tests: Vec::new(),
            run_mode: RunMode::default(),
            publish_mode: PublishMode::default(),
            counts: BTreeMap::new(),
        }
    }

    pub fn test(mut self, test: TestSpec) -> Self {
        self.tests.push(test);
        self
    }

    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    /// Executions still allowed for a count-bounded test
    pub fn remaining(&self, test: &TestSpec) -> Option<u64> {
        let done = self.counts.get(&test.name).copied().unwrap_or(0);
        test.count.map(|c| c.saturating_sub(done))
    }
}

/// A phase ready to be executed
pub struct Phase {
    name: String,
    measurable: bool,
    duration: Option<Duration>,
    tests: Vec<TestUnit>,
    suite: Arc<TestSuite>,
    run_mode: RunMode,
    publish_mode: PublishMode,
    counts: Arc<ExecutionCounts>,
}

impl Phase {
    pub fn new(name: impl Into<String>, tests: Vec<TestUnit>) -> Result<Self, PhaseError> {
        let name = name.into();
        let suite = TestSuite::with_tests(name.clone(), tests.clone()).map_err(|source| {
            PhaseError::Suite {
                phase: name.clone(),
                source,
            }
        })?;

        let counts = Arc::new(ExecutionCounts::new());
        for test in &tests {
            counts.seed(test.id(), test.name(), 0);
        }

        Ok(Self {
            name,
            measurable: true,
            duration: None,
            tests,
            suite: Arc::new(suite),
            run_mode: RunMode::default(),
            publish_mode: PublishMode::default(),
            counts,
        })
    }

    /// Build a phase from its spec; prior progress in `spec.counts` is
    /// charged against the count limits
    pub fn from_spec(
        spec: &PhaseSpec,
        registry: &TestRegistry,
        default_duration: Option<Duration>,
    ) -> Result<Self, PhaseError> {
        let tests = spec
            .tests
            .iter()
            .map(|t| registry.build(t))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| PhaseError::Registry {
                phase: spec.name.clone(),
                source,
            })?;

        let phase = Phase::new(spec.name.clone(), tests)?
            .with_measurable(spec.measurable)
            .with_duration(spec.duration_secs.map(Duration::from_secs).or(default_duration))
            .with_run_mode(spec.run_mode.clone())
            .with_publish_mode(spec.publish_mode.clone());

        for test in &phase.tests {
            let done = spec.counts.get(test.name()).copied().unwrap_or(0);
            if done > 0 {
                phase.counts.seed(test.id(), test.name(), done);
            }
            if phase.counts.is_exhausted(test.id(), test.count()) {
                phase.suite.remove(test.id());
            }
        }

        Ok(phase)
    }

    pub fn with_measurable(mut self, measurable: bool) -> Self {
        self.measurable = measurable;
        self
    }

    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    pub fn with_publish_mode(mut self, publish_mode: PublishMode) -> Self {
        self.publish_mode = publish_mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn measurable(&self) -> bool {
        self.measurable
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Units as configured, including ones already removed from the suite
    pub fn tests(&self) -> &[TestUnit] {
        &self.tests
    }

    pub fn suite(&self) -> &Arc<TestSuite> {
        &self.suite
    }

    pub fn run_mode(&self) -> &RunMode {
        &self.run_mode
    }

    pub fn publish_mode(&self) -> &PublishMode {
        &self.publish_mode
    }

    pub fn counts(&self) -> &Arc<ExecutionCounts> {
        &self.counts
    }

    /// Serializable form including live counts
    pub fn to_spec(&self) -> PhaseSpec {
        PhaseSpec {
            name: self.name.clone(),
            measurable: self.measurable,
            duration_secs: self.duration.map(|d| d.as_secs()),
            tests: self.tests.iter().map(TestUnit::to_spec).collect(),
            run_mode: self.run_mode.clone(),
            publish_mode: self.publish_mode.clone(),
            counts: self
                .counts
                .snapshot()
                .into_iter()
                .filter(|(_, n)| *n > 0)
                .collect(),
        }
    }
}
