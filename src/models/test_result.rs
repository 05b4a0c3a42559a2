//! Test outcome models
//!
//! Defines what a single test execution can produce and the raw record
//! that is handed to publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::test_unit::TestId;

/// Why an execution failed or was skipped
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureCause {
    /// Failure classification, used as the key of the per-test breakdown
    pub kind: String,
    /// Human readable detail
    pub message: String,
}

impl FailureCause {
    /// Kind recorded when the timeout monitor interrupts a test
    pub const INTERRUPTED: &'static str = "interrupted";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Failure produced by a timeout-driven interruption
    pub fn interrupted(timeout: Duration) -> Self {
        Self::new(
            Self::INTERRUPTED,
            format!("interrupted after exceeding timeout of {}ms", timeout.as_millis()),
        )
    }

    pub fn is_interruption(&self) -> bool {
        self.kind == Self::INTERRUPTED
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// What a test action reports back to the runner
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(FailureCause),
    Skip(String),
}

impl Verdict {
    pub fn fail(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Verdict::Fail(FailureCause::new(kind, message))
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Verdict::Skip(reason.into())
    }
}

/// Outcome of one execution as recorded in statistics
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Passed(Duration),
    Failed(FailureCause),
    Skipped(String),
}

impl Outcome {
    /// Turn a verdict into an outcome, attaching the measured duration on success
    pub fn from_verdict(verdict: Verdict, elapsed: Duration) -> Self {
        match verdict {
            Verdict::Pass => Outcome::Passed(elapsed),
            Verdict::Fail(cause) => Outcome::Failed(cause),
            Verdict::Skip(reason) => Outcome::Skipped(reason),
        }
    }

    pub fn status(&self) -> TestStatus {
        match self {
            Outcome::Passed(_) => TestStatus::Pass,
            Outcome::Failed(_) => TestStatus::Fail,
            Outcome::Skipped(_) => TestStatus::Skip,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed(_))
    }
}

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Skip => "○",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Pass)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Skip => write!(f, "SKIP"),
        }
    }
}

/// Raw record of a single test execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub test: TestId,
    pub name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub failure_kind: Option<String>,
    pub started_at: DateTime<Utc>,
    pub worker: usize,
}

impl TestResult {
    pub fn new(
        test: TestId,
        name: impl Into<String>,
        outcome: &Outcome,
        elapsed: Duration,
        started_at: DateTime<Utc>,
        worker: usize,
    ) -> Self {
        let (message, failure_kind) = match outcome {
            Outcome::Passed(_) => (None, None),
            Outcome::Failed(cause) => (Some(cause.message.clone()), Some(cause.kind.clone())),
            Outcome::Skipped(reason) => (Some(reason.clone()), None),
        };

        Self {
            test,
            name: name.into(),
            status: outcome.status(),
            duration_ms: elapsed.as_millis() as u64,
            message,
            failure_kind,
            started_at,
            worker,
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.name,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_verdict() {
        let elapsed = Duration::from_millis(42);
        assert_eq!(
            Outcome::from_verdict(Verdict::Pass, elapsed),
            Outcome::Passed(elapsed)
        );

        let failed = Outcome::from_verdict(Verdict::fail("http_status", "500"), elapsed);
        assert_eq!(failed.status(), TestStatus::Fail);

        let skipped = Outcome::from_verdict(Verdict::skip("not ready"), elapsed);
        assert_eq!(skipped, Outcome::Skipped("not ready".to_string()));
    }

    #[test]
    fn test_interrupted_cause() {
        let cause = FailureCause::interrupted(Duration::from_millis(250));
        assert!(cause.is_interruption());
        assert!(cause.message.contains("250ms"));
    }

    #[test]
    fn test_result_display() {
        let outcome = Outcome::Failed(FailureCause::new("connection", "refused"));
        let result = TestResult::new(
            TestId::new(),
            "Login",
            &outcome,
            Duration::from_millis(12),
            Utc::now(),
            3,
        );

        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.failure_kind.as_deref(), Some("connection"));
        assert_eq!(result.to_string(), "✗ Login [12ms] - refused");
    }
}
