//! Result aggregation
//!
//! Drains every worker recorder into the phase-wide recorder on a fixed
//! delay and hands the merged view to the publishers.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::pool::WorkerSet;
use crate::models::TestResult;
use crate::publish::{PublishGate, PublishMode, Publisher};
use crate::stats::{MetricResult, RunMap};

/// Default delay between two aggregation cycles
pub const DEFAULT_AGGREGATION_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic merge-and-publish task for one phase
pub struct ResultAggregator {
    phase: String,
    measurable: bool,
    global: Arc<RunMap>,
    workers: Arc<WorkerSet>,
    publishers: Vec<Arc<dyn Publisher>>,
    gate: PublishGate,
    delay: Duration,
    raw: mpsc::UnboundedReceiver<TestResult>,
    started: Instant,
}

impl ResultAggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        phase: impl Into<String>,
        measurable: bool,
        global: Arc<RunMap>,
        workers: Arc<WorkerSet>,
        publishers: Vec<Arc<dyn Publisher>>,
        publish_mode: &PublishMode,
        delay: Duration,
        raw: mpsc::UnboundedReceiver<TestResult>,
    ) -> Self {
        Self {
            phase: phase.into(),
            measurable,
            global,
            workers,
            publishers,
            gate: publish_mode.gate(),
            delay,
            raw,
            started: Instant::now(),
        }
    }

    pub fn global(&self) -> &Arc<RunMap> {
        &self.global
    }

    /// Fold every worker recorder into the global one; returns the number
    /// of executions folded
    pub fn aggregate(&self) -> u64 {
        self.workers
            .snapshot()
            .iter()
            .map(|slot| {
                self.global
                    .aggregate_and_reinitialize(slot.recorder())
                    .values()
                    .sum::<u64>()
            })
            .sum()
    }

    fn drain_raw(&mut self) -> Vec<TestResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.raw.try_recv() {
            results.push(result);
        }
        results
    }

    /// One aggregation cycle
    pub fn cycle(&mut self, now: Instant) {
        let folded = self.aggregate();
        let raw = self.drain_raw();
        trace!("Aggregated {} executions for {}", folded, self.phase);

        if !self.measurable {
            return;
        }

        if self.gate.should_publish(now) {
            let metrics = self.global.metrics(self.started.elapsed());
            for publisher in &self.publishers {
                if let Err(e) = publisher.publish_intermediate(&self.phase, &metrics) {
                    warn!("Publisher {} failed: {:#}", publisher.name(), e);
                }
            }
        }

        if !raw.is_empty() {
            for publisher in &self.publishers {
                if let Err(e) = publisher.publish_raw(&self.phase, &raw) {
                    warn!("Publisher {} failed on raw results: {:#}", publisher.name(), e);
                }
            }
        }
    }

    /// Cycle until `stop` is cancelled. A cycle that overruns the delay is
    /// followed immediately by the next one.
    pub async fn run(mut self, stop: CancellationToken) -> Self {
        loop {
            let start = Instant::now();
            self.cycle(start);
            let spent = start.elapsed();

            let pause = match self.delay.checked_sub(spent) {
                Some(pause) => pause,
                None => {
                    warn!(
                        "Aggregation for {} took {}ms, longer than the {}ms interval",
                        self.phase,
                        spent.as_millis(),
                        self.delay.as_millis()
                    );
                    Duration::ZERO
                }
            };

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        self
    }

    /// Last aggregation plus final publication; returns the final metrics
    pub fn finish(mut self) -> Vec<MetricResult> {
        self.aggregate();
        let raw = self.drain_raw();
        let metrics = self.global.metrics(self.started.elapsed());

        if self.measurable {
            for publisher in &self.publishers {
                if !raw.is_empty() {
                    if let Err(e) = publisher.publish_raw(&self.phase, &raw) {
                        warn!("Publisher {} failed on raw results: {:#}", publisher.name(), e);
                    }
                }
                if let Err(e) = publisher.publish_final(&self.phase, &metrics) {
                    warn!("Publisher {} failed: {:#}", publisher.name(), e);
                }
            }
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionContext, Outcome, TestAction, TestUnit, Verdict};
    use crate::engine::WorkerSlot;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Nothing;

    #[async_trait]
    impl TestAction for Nothing {
        async fn execute(&self, _ctx: &ExecutionContext) -> Verdict {
            Verdict::Pass
        }
    }

    #[derive(Default)]
    struct Collect {
        intermediate: Mutex<Vec<Vec<MetricResult>>>,
        finals: Mutex<Vec<Vec<MetricResult>>>,
    }

    impl Publisher for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn publish_intermediate(&self, _phase: &str, results: &[MetricResult]) -> anyhow::Result<()> {
            self.intermediate.lock().push(results.to_vec());
            Ok(())
        }

        fn publish_final(&self, _phase: &str, results: &[MetricResult]) -> anyhow::Result<()> {
            self.finals.lock().push(results.to_vec());
            Ok(())
        }
    }

    fn setup(measurable: bool) -> (ResultAggregator, Arc<WorkerSet>, Arc<Collect>, TestUnit) {
        let unit = TestUnit::leaf("A", "noop", Arc::new(Nothing));
        let workers = Arc::new(WorkerSet::new());
        let collect = Arc::new(Collect::default());
        let (_tx, rx) = mpsc::unbounded_channel();
        let aggregator = ResultAggregator::new(
            "load",
            measurable,
            Arc::new(RunMap::for_tests(std::slice::from_ref(&unit))),
            workers.clone(),
            vec![collect.clone() as Arc<dyn Publisher>],
            &PublishMode::Simple,
            Duration::from_millis(10),
            rx,
        );
        (aggregator, workers, collect, unit)
    }

    fn worker(workers: &WorkerSet, id: usize) -> Arc<WorkerSlot> {
        let slot = Arc::new(WorkerSlot::new(id, Arc::new(RunMap::new()), &CancellationToken::new()));
        workers.register(slot.clone());
        slot
    }

    #[test]
    fn test_cycle_drains_workers_once() {
        let (mut aggregator, workers, collect, unit) = setup(true);
        let a = worker(&workers, 0);
        let b = worker(&workers, 1);

        a.recorder().record_unit(&unit, &Outcome::Passed(Duration::from_millis(10)));
        b.recorder().record_unit(&unit, &Outcome::Passed(Duration::from_millis(20)));
        aggregator.cycle(Instant::now());
        aggregator.cycle(Instant::now());

        assert_eq!(aggregator.global().stats(unit.id()).unwrap().total_runs(), 2);
        assert_eq!(a.recorder().total_executions(), 0);
        assert_eq!(collect.intermediate.lock().len(), 2);

        let metrics = aggregator.finish();
        assert_eq!(metrics[0].total_runs, 2);
        assert_eq!(collect.finals.lock().len(), 1);
    }

    #[test]
    fn test_unmeasurable_phase_not_published() {
        let (mut aggregator, workers, collect, unit) = setup(false);
        worker(&workers, 0)
            .recorder()
            .record_unit(&unit, &Outcome::Passed(Duration::from_millis(1)));

        aggregator.cycle(Instant::now());
        let metrics = aggregator.finish();

        assert_eq!(metrics[0].total_runs, 1);
        assert!(collect.intermediate.lock().is_empty());
        assert!(collect.finals.lock().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (aggregator, _workers, collect, _unit) = setup(true);
        let stop = CancellationToken::new();
        let handle = tokio::spawn(aggregator.run(stop.clone()));

        tokio::time::sleep(Duration::from_millis(35)).await;
        stop.cancel();
        let aggregator = handle.await.unwrap();
        aggregator.finish();

        assert!(!collect.intermediate.lock().is_empty());
        assert_eq!(collect.finals.lock().len(), 1);
    }
}
