//! Per-phase execution counts
//!
//! Count-bounded tests claim a slot here before they run, so the number of
//! executions never exceeds the limit no matter how many workers race for it.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::models::TestId;

#[derive(Debug, Default)]
struct TestCounter {
    claimed: AtomicU64,
    completed: AtomicU64,
}

/// Result of trying to reserve an execution slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    /// Slot reserved; `last` is set when this claim used up the limit
    Granted { last: bool },
    /// Limit already reached
    Exhausted,
}

/// Shared execution-count map for one phase
#[derive(Debug, Default)]
pub struct ExecutionCounts {
    counters: DashMap<TestId, Arc<TestCounter>>,
    names: DashMap<TestId, String>,
}

impl ExecutionCounts {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, id: TestId) -> Arc<TestCounter> {
        self.counters.entry(id).or_default().clone()
    }

    /// Make a test known, optionally with executions done elsewhere
    pub fn seed(&self, id: TestId, name: impl Into<String>, done: u64) {
        self.names.insert(id, name.into());
        let counter = self.counter(id);
        counter.claimed.fetch_add(done, Ordering::AcqRel);
        counter.completed.fetch_add(done, Ordering::AcqRel);
    }

    /// Reserve one execution of `id` against `limit`
    pub fn try_claim(&self, id: TestId, limit: Option<u64>) -> Claim {
        let counter = self.counter(id);
        let mut current = counter.claimed.load(Ordering::Acquire);

        loop {
            if let Some(limit) = limit {
                if current >= limit {
                    return Claim::Exhausted;
                }
            }

            match counter.claimed.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let last = limit.is_some_and(|l| current + 1 >= l);
                    return Claim::Granted { last };
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Whether `limit` has been used up by claims
    pub fn is_exhausted(&self, id: TestId, limit: Option<u64>) -> bool {
        limit.is_some_and(|l| self.claimed(id) >= l)
    }

    pub fn complete(&self, id: TestId) {
        self.counter(id).completed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn claimed(&self, id: TestId) -> u64 {
        self.counters
            .get(&id)
            .map(|c| c.claimed.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn completed(&self, id: TestId) -> u64 {
        self.counters
            .get(&id)
            .map(|c| c.completed.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Completed executions keyed by test name
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.names
            .iter()
            .map(|entry| (entry.value().clone(), self.completed(*entry.key())))
            .collect()
    }

    pub fn total_completed(&self) -> u64 {
        self.counters
            .iter()
            .map(|c| c.completed.load(Ordering::Acquire))
            .sum()
    }
}
