//! Data models
//!
//! Test units and suites, phases, and what a test execution produces.

mod phase;
mod suite;
mod test_result;
mod test_unit;

pub use phase::{Phase, PhaseError, PhaseSpec};
pub use suite::{SuiteError, TestSuite};
pub use test_result::{FailureCause, Outcome, TestResult, TestStatus, Verdict};
pub use test_unit::{
    ExecutionContext, TestAction, TestBody, TestId, TestSpec, TestUnit, COMPOSITE_KIND,
};
