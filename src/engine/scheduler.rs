//! Weighted random test selection
//!
//! Draws a number in `[0, total_weight)` and walks the suite subtracting
//! weights. Units whose count limit is used up are dropped from the suite
//! under the exclusive lock and the draw starts over.

use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::counts::{Claim, ExecutionCounts};
use crate::models::{TestId, TestSuite, TestUnit};

/// Scheduler errors; the worker treats any of them as "stop"
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduling cancelled")]
    Cancelled,
}

enum Draw {
    Empty,
    Selected(TestUnit),
    Exhausted(TestId),
}

/// Picks the next unit to run from a shared suite
#[derive(Clone)]
pub struct WeightedScheduler {
    suite: Arc<TestSuite>,
    counts: Arc<ExecutionCounts>,
}

impl WeightedScheduler {
    pub fn new(suite: Arc<TestSuite>, counts: Arc<ExecutionCounts>) -> Self {
        Self { suite, counts }
    }

    pub fn suite(&self) -> &Arc<TestSuite> {
        &self.suite
    }

    pub fn counts(&self) -> &Arc<ExecutionCounts> {
        &self.counts
    }

    /// Next unit to run, or `None` once the suite is empty
    pub fn next(&self, cancel: &CancellationToken) -> Result<Option<TestUnit>, SchedulerError> {
        self.next_with(&mut rand::rng(), cancel)
    }

    /// Same as [`next`](Self::next) with a caller-provided random source
    pub fn next_with<R: Rng>(
        &self,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> Result<Option<TestUnit>, SchedulerError> {
        loop {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }

            let draw = self.suite.draw(|tests, total_weight| {
                if total_weight == 0 {
                    return Draw::Empty;
                }

                let mut pick = rng.random_range(0..total_weight) as i64;
                for unit in tests {
                    if self.counts.is_exhausted(unit.id(), unit.count()) {
                        return Draw::Exhausted(unit.id());
                    }
                    pick -= i64::from(unit.weight());
                    if pick < 0 {
                        return Draw::Selected(unit.clone());
                    }
                }
                // Only reachable if weights and total disagree; draw again
                Draw::Empty
            });

            match draw {
                Draw::Empty if self.suite.total_weight() == 0 => return Ok(None),
                Draw::Empty => continue,
                Draw::Exhausted(id) => {
                    self.retire(id);
                }
                Draw::Selected(unit) => match self.counts.try_claim(unit.id(), unit.count()) {
                    Claim::Granted { last } => {
                        if last {
                            self.retire(unit.id());
                        }
                        return Ok(Some(unit));
                    }
                    // Another worker took the final slot after our draw
                    Claim::Exhausted => self.retire(unit.id()),
                },
            }
        }
    }

    fn retire(&self, id: TestId) {
        let counts = &self.counts;
        if let Some(unit) = self
            .suite
            .remove_if(id, |unit| counts.is_exhausted(unit.id(), unit.count()))
        {
            debug!(
                "Removed {} from suite {} after {} executions",
                unit.name(),
                self.suite.name(),
                counts.claimed(id)
            );
        }
    }
}
