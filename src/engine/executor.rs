//! Phase execution
//!
//! The engine wires scheduler, worker pool, timeout monitor and aggregator
//! together for each phase and runs the phases of a configuration in order.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::aggregator::ResultAggregator;
use super::pool::{WorkerPool, WorkerSet};
use super::runner::TestRunner;
use super::scheduler::WeightedScheduler;
use super::timeout::TimeoutMonitor;
use super::worker::{Interrupt, WorkerContext};
use crate::config::{Configuration, GlobalArgs};
use crate::http::HttpClient;
use crate::models::{ExecutionContext, Outcome, Phase, TestSpec};
use crate::publish::Publisher;
use crate::registry::TestRegistry;
use crate::stats::{MetricResult, RunMap};

/// How often the end conditions and the ramp target are checked
const CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Why a phase ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    DurationElapsed,
    SuiteExhausted,
    Stopped,
}

/// Outcome of one phase
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub elapsed_secs: f64,
    pub end: EndReason,
    pub metrics: Vec<MetricResult>,
    /// Completed executions per test name
    pub counts: BTreeMap<String, u64>,
}

/// Outcome of a whole run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub phases: Vec<PhaseReport>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn total_executions(&self) -> u64 {
        self.phases
            .iter()
            .flat_map(|p| p.metrics.iter())
            .map(|m| m.executions())
            .sum()
    }
}

/// Local execution engine
pub struct Engine {
    globals: GlobalArgs,
    registry: Arc<TestRegistry>,
    publishers: Vec<Arc<dyn Publisher>>,
    context: Arc<ExecutionContext>,
    stop: CancellationToken,
}

impl Engine {
    pub fn new(
        globals: GlobalArgs,
        registry: Arc<TestRegistry>,
        publishers: Vec<Arc<dyn Publisher>>,
    ) -> Result<Self> {
        let timeout_secs = globals.default_timeout().as_secs().max(1);
        let client = HttpClient::with_timeout(timeout_secs)?;
        let context = Arc::new(ExecutionContext::new(globals.target.clone(), client));

        Ok(Self {
            globals,
            registry,
            publishers,
            context,
            stop: CancellationToken::new(),
        })
    }

    pub fn globals(&self) -> &GlobalArgs {
        &self.globals
    }

    pub fn registry(&self) -> &Arc<TestRegistry> {
        &self.registry
    }

    /// Ask the running phase (and the run) to end
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Build a phase against this engine's registry and defaults
    pub fn build_phase(&self, spec: &crate::models::PhaseSpec) -> Result<Phase> {
        Ok(Phase::from_spec(
            spec,
            &self.registry,
            self.globals.default_duration(),
        )?)
    }

    /// Execute setup tests, then every phase in order
    pub async fn run(&self, config: &Configuration) -> Result<RunSummary> {
        let started = Instant::now();

        if !config.setup.is_empty() {
            self.run_setup(&config.setup).await?;
        }

        let mut summary = RunSummary::default();
        for spec in &config.phases {
            if self.is_stopped() {
                warn!("Run stopped before phase {}", spec.name);
                break;
            }
            let phase = self
                .build_phase(spec)
                .with_context(|| format!("Failed to build phase {}", spec.name))?;
            summary.phases.push(self.run_phase(&phase).await);
        }

        for publisher in &self.publishers {
            publisher.finish();
        }

        summary.elapsed_secs = started.elapsed().as_secs_f64();
        Ok(summary)
    }

    /// Run every setup test once, in order; the first failure aborts
    pub async fn run_setup(&self, tests: &[TestSpec]) -> Result<()> {
        let runner = TestRunner::new(self.context.clone());
        let recorder = RunMap::new();

        for spec in tests {
            let unit = self.registry.build(spec)?;
            let interrupt = Interrupt::new(unit.timeout_or(self.globals.default_timeout()));

            let outcome = tokio::select! {
                outcome = runner.run(&unit, &interrupt, &recorder) => outcome,
                _ = tokio::time::sleep(interrupt.timeout()) => {
                    Outcome::Failed(crate::models::FailureCause::interrupted(interrupt.timeout()))
                }
            };

            match outcome {
                Outcome::Passed(elapsed) => {
                    info!("Setup {} done in {}ms", unit.name(), elapsed.as_millis())
                }
                Outcome::Skipped(reason) => info!("Setup {} skipped: {}", unit.name(), reason),
                Outcome::Failed(cause) => bail!("Setup test {} failed: {}", unit.name(), cause),
            }
        }
        Ok(())
    }

    /// Execute one phase until its duration elapses, its suite runs dry or
    /// the engine is stopped
    pub async fn run_phase(&self, phase: &Phase) -> PhaseReport {
        let started = Instant::now();
        info!(
            "Starting phase {} ({} tests, {:?}, duration {:?})",
            phase.name(),
            phase.suite().len(),
            phase.run_mode(),
            phase.duration()
        );

        let default_timeout = self.globals.default_timeout();
        let workers = Arc::new(WorkerSet::new());
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let ctx = WorkerContext {
            scheduler: WeightedScheduler::new(phase.suite().clone(), phase.counts().clone()),
            runner: TestRunner::new(self.context.clone()),
            default_timeout,
            wait_time: phase.run_mode().wait_time(),
            raw: Some(raw_tx),
        };
        let mut pool = WorkerPool::new(ctx, phase.tests().to_vec(), workers.clone());

        let services = CancellationToken::new();
        let min_timeout = phase
            .suite()
            .min_timeout(default_timeout)
            .unwrap_or(default_timeout);
        let monitor = tokio::spawn(TimeoutMonitor::new(workers.clone(), min_timeout).run(services.clone()));

        let aggregator = ResultAggregator::new(
            phase.name(),
            phase.measurable(),
            Arc::new(RunMap::for_tests(phase.tests())),
            workers.clone(),
            self.publishers.clone(),
            phase.publish_mode(),
            self.globals.aggregation_interval(),
            raw_rx,
        );
        let aggregator = tokio::spawn(aggregator.run(services.clone()));

        pool.resize(phase.run_mode().target_workers(Duration::ZERO));
        let end = self.wait_for_end(phase, &mut pool, started).await;

        // In-flight tests finish (or time out) before the monitor goes away
        pool.shutdown().await;
        services.cancel();
        if let Err(e) = monitor.await {
            warn!("Timeout monitor failed: {}", e);
        }

        let metrics = match aggregator.await {
            Ok(aggregator) => aggregator.finish(),
            Err(e) => {
                warn!("Aggregator failed: {}", e);
                Vec::new()
            }
        };

        let elapsed = started.elapsed();
        info!(
            "Phase {} ended ({:?}) after {:.1}s with {} executions",
            phase.name(),
            end,
            elapsed.as_secs_f64(),
            phase.counts().total_completed()
        );

        PhaseReport {
            name: phase.name().to_string(),
            elapsed_secs: elapsed.as_secs_f64(),
            end,
            metrics,
            counts: phase.counts().snapshot(),
        }
    }

    async fn wait_for_end(&self, phase: &Phase, pool: &mut WorkerPool, started: Instant) -> EndReason {
        let deadline = phase
            .duration()
            .map(|d| tokio::time::Instant::from_std(started + d));
        let mut ticker = tokio::time::interval(CHECK_INTERVAL);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return EndReason::Stopped,
                _ = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => return EndReason::DurationElapsed,
                _ = ticker.tick() => {}
            }

            if phase.suite().is_empty() {
                return EndReason::SuiteExhausted;
            }
            pool.resize(phase.run_mode().target_workers(started.elapsed()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RunMode;
    use crate::models::{PhaseSpec, TestAction, TestUnit, Verdict};
    use async_trait::async_trait;

    struct Hang;

    #[async_trait]
    impl TestAction for Hang {
        async fn execute(&self, _ctx: &crate::models::ExecutionContext) -> Verdict {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Verdict::Pass
        }
    }

    fn engine() -> Engine {
        let globals = GlobalArgs {
            aggregation_interval_ms: 20,
            ..GlobalArgs::default()
        };
        Engine::new(globals, Arc::new(TestRegistry::with_builtins()), Vec::new()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_count_bounded_phase_exhausts() {
        let engine = engine();
        let spec = PhaseSpec::new("bounded")
            .run_mode(RunMode::normal(8))
            .test(TestSpec::new("A", "noop").count(25))
            .test(TestSpec::new("B", "noop").count(10).weight(3));
        let phase = engine.build_phase(&spec).unwrap();

        let report = engine.run_phase(&phase).await;

        assert_eq!(report.end, EndReason::SuiteExhausted);
        assert_eq!(report.counts.get("A"), Some(&25));
        assert_eq!(report.counts.get("B"), Some(&10));
        let runs: u64 = report.metrics.iter().map(|m| m.total_runs).sum();
        assert_eq!(runs, 35);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_duration_ends_phase() {
        let engine = engine();
        let spec = PhaseSpec::new("timed")
            .duration_secs(1)
            .run_mode(RunMode::normal(2))
            .test(TestSpec::new("Nap", "sleep").property("millis", 20));
        let phase = engine.build_phase(&spec).unwrap();

        let report = engine.run_phase(&phase).await;
        assert_eq!(report.end, EndReason::DurationElapsed);
        assert!(report.metrics[0].total_runs > 0);
        assert!(report.elapsed_secs >= 1.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_workers_still_end_on_time() {
        let engine = engine();
        let spec = PhaseSpec::new("spin")
            .duration_secs(1)
            .run_mode(RunMode::normal(4))
            .test(TestSpec::new("Ping", "noop"));
        let phase = engine.build_phase(&spec).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let handle = tokio::runtime::Handle::current();
        std::thread::spawn(move || {
            let report = handle.block_on(async move { engine.run_phase(&phase).await });
            let _ = tx.send(report);
        });

        let report = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(10)))
            .await
            .unwrap()
            .expect("phase did not end within 10s");
        assert_eq!(report.end, EndReason::DurationElapsed);
        assert!(report.metrics[0].total_runs > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_interrupts_stuck_test() {
        let engine = engine();
        let unit = TestUnit::leaf("Stuck", "custom", Arc::new(Hang))
            .with_timeout(Some(Duration::from_millis(100)))
            .with_count(Some(2));
        let phase = Phase::new("stuck", vec![unit])
            .unwrap()
            .with_run_mode(RunMode::normal(2));

        let report = tokio::time::timeout(Duration::from_secs(10), engine.run_phase(&phase))
            .await
            .unwrap();

        let metric = &report.metrics[0];
        assert_eq!(metric.failed, 2);
        assert_eq!(metric.failures.get("interrupted"), Some(&2));
        assert_eq!(metric.target_failures(), 0);
    }

    #[tokio::test]
    async fn test_stop_ends_unbounded_phase() {
        let engine = Arc::new(engine());
        let spec = PhaseSpec::new("forever")
            .run_mode(RunMode::normal(1))
            .test(TestSpec::new("Nap", "sleep").property("millis", 5));
        let phase = engine.build_phase(&spec).unwrap();

        let stopper = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.stop();
        });

        let report = engine.run_phase(&phase).await;
        assert_eq!(report.end, EndReason::Stopped);
    }

    #[tokio::test]
    async fn test_run_executes_phases_in_order() {
        let engine = engine();
        let config = Configuration {
            setup: vec![TestSpec::new("Seed", "noop")],
            phases: vec![
                PhaseSpec::new("one").test(TestSpec::new("A", "noop").count(3)),
                PhaseSpec::new("two").test(TestSpec::new("B", "noop").count(2)),
            ],
            ..Configuration::default()
        };

        let summary = engine.run(&config).await.unwrap();
        let names: Vec<_> = summary.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert_eq!(summary.total_executions(), 5);
    }

    #[tokio::test]
    async fn test_failing_setup_aborts_run() {
        let engine = engine();
        let config = Configuration {
            setup: vec![TestSpec::new("Seed", "http").property("path", "http://127.0.0.1:1/")],
            phases: vec![PhaseSpec::new("one").test(TestSpec::new("A", "noop").count(1))],
            ..Configuration::default()
        };
        assert!(engine.run(&config).await.is_err());
    }
}
