//! Workers
//!
//! A worker repeatedly asks the scheduler for a unit, runs it and records
//! the outcome into its own recorder. The "current test" marker sits behind
//! a per-worker mutex so the timeout monitor can interrupt exactly the
//! execution that overran, and nothing else.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::runner::TestRunner;
use super::scheduler::WeightedScheduler;
use crate::models::{TestId, TestResult, TestUnit};
use crate::stats::RunMap;

/// Per-execution cancellation handle passed down to the runner
#[derive(Clone, Debug)]
pub struct Interrupt {
    token: CancellationToken,
    timeout: Duration,
}

impl Interrupt {
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the execution has been interrupted
    pub async fn interrupted(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn trigger(&self) {
        self.token.cancel();
    }
}

#[derive(Debug)]
struct CurrentTest {
    test: TestId,
    name: String,
    execution: u64,
    started: Instant,
    interrupt: Interrupt,
}

/// What one timeout sweep found on a worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepResult {
    /// No test in flight
    Idle,
    /// Marker lock held; the worker is between tests
    Busy,
    WithinTimeout,
    /// The in-flight execution of this test was interrupted
    Interrupted(TestId),
}

/// Shared state of one worker
pub struct WorkerSlot {
    id: usize,
    current: Mutex<Option<CurrentTest>>,
    recorder: Arc<RunMap>,
    retire: CancellationToken,
    next_execution: AtomicU64,
}

impl WorkerSlot {
    pub fn new(id: usize, recorder: Arc<RunMap>, parent: &CancellationToken) -> Self {
        Self {
            id,
            current: Mutex::new(None),
            recorder,
            retire: parent.child_token(),
            next_execution: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn recorder(&self) -> &Arc<RunMap> {
        &self.recorder
    }

    /// Ask the worker to stop after its current test
    pub fn retire(&self) {
        self.retire.cancel();
    }

    pub fn is_retired(&self) -> bool {
        self.retire.is_cancelled()
    }

    /// Mark `unit` as running and hand back its interrupt handle
    pub fn begin(&self, unit: &TestUnit, timeout: Duration) -> Interrupt {
        let interrupt = Interrupt::new(timeout);
        let execution = self.next_execution.fetch_add(1, Ordering::Relaxed);
        *self.current.lock() = Some(CurrentTest {
            test: unit.id(),
            name: unit.name().to_string(),
            execution,
            started: Instant::now(),
            interrupt: interrupt.clone(),
        });
        interrupt
    }

    /// Clear the running marker
    pub fn end(&self) {
        self.current.lock().take();
    }

    /// Test currently in flight, if any
    pub fn current_test(&self) -> Option<TestId> {
        self.current.try_lock().and_then(|c| c.as_ref().map(|c| c.test))
    }

    /// Interrupt the in-flight test if it has overrun its own timeout.
    ///
    /// Never blocks: a held marker lock means the worker is switching tests
    /// and is left alone for this sweep. The execution number is compared
    /// again under the lock so a test that finished between the two looks
    /// is never charged for its predecessor.
    pub fn interrupt_if_expired(&self, now: Instant) -> SweepResult {
        let observed = {
            let Some(guard) = self.current.try_lock() else {
                return SweepResult::Busy;
            };
            match guard.as_ref() {
                None => return SweepResult::Idle,
                Some(current) => {
                    if now.saturating_duration_since(current.started) <= current.interrupt.timeout() {
                        return SweepResult::WithinTimeout;
                    }
                    current.execution
                }
            }
        };

        let Some(guard) = self.current.try_lock() else {
            return SweepResult::Busy;
        };
        match guard.as_ref() {
            Some(current) if current.execution == observed => {
                debug!(
                    "Interrupting {} on worker {} after {}ms",
                    current.name,
                    self.id,
                    now.saturating_duration_since(current.started).as_millis()
                );
                current.interrupt.trigger();
                SweepResult::Interrupted(current.test)
            }
            Some(_) => SweepResult::WithinTimeout,
            None => SweepResult::Idle,
        }
    }
}

/// Everything a worker loop needs besides its slot
#[derive(Clone)]
pub struct WorkerContext {
    pub scheduler: WeightedScheduler,
    pub runner: TestRunner,
    pub default_timeout: Duration,
    pub wait_time: Duration,
    pub raw: Option<mpsc::UnboundedSender<TestResult>>,
}

/// Worker loop; returns when the suite is empty or the worker is retired
pub async fn run_worker(slot: Arc<WorkerSlot>, ctx: WorkerContext) {
    trace!("Worker {} started", slot.id);

    loop {
        let unit = match ctx.scheduler.next(&slot.retire) {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                debug!("Worker {}: no more work", slot.id);
                break;
            }
            Err(e) => {
                trace!("Worker {} stopping: {}", slot.id, e);
                break;
            }
        };

        let timeout = unit.timeout_or(ctx.default_timeout);
        let interrupt = slot.begin(&unit, timeout);
        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = ctx.runner.run(&unit, &interrupt, &slot.recorder).await;
        let elapsed = start.elapsed();

        slot.recorder.record_unit(&unit, &outcome);
        ctx.scheduler.counts().complete(unit.id());

        if let Some(raw) = &ctx.raw {
            let _ = raw.send(TestResult::new(
                unit.id(),
                unit.name(),
                &outcome,
                elapsed,
                started_at,
                slot.id,
            ));
        }
        slot.end();

        if ctx.wait_time.is_zero() {
            // actions that never suspend would otherwise keep the timers
            // and the other tasks of this runtime thread from running
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = slot.retire.cancelled() => break,
                _ = tokio::time::sleep(ctx.wait_time) => {}
            }
        }
    }

    trace!("Worker {} finished", slot.id);
}
