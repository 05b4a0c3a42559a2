//! Test runner
//!
//! A single recursive runner dispatching on the unit body. Leaves run
//! `before`, `execute` and `after` in that order, with `execute` raced
//! against the execution's interrupt. Composites run their children in
//! order and stop at the first child that does not pass.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Instant;

use super::worker::Interrupt;
use crate::models::{ExecutionContext, FailureCause, Outcome, TestAction, TestBody, TestUnit};
use crate::stats::RunMap;

/// Executes test units against a shared context
#[derive(Clone)]
pub struct TestRunner {
    ctx: Arc<ExecutionContext>,
}

impl TestRunner {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    /// Run `unit`; children of composites are recorded into `recorder`
    pub fn run<'a>(
        &'a self,
        unit: &'a TestUnit,
        interrupt: &'a Interrupt,
        recorder: &'a RunMap,
    ) -> BoxFuture<'a, Outcome> {
        async move {
            match unit.body() {
                TestBody::Leaf(action) => self.run_leaf(action.as_ref(), interrupt).await,
                TestBody::Composite(children) => {
                    let start = Instant::now();
                    for child in children {
                        if interrupt.is_interrupted() {
                            return Outcome::Failed(FailureCause::interrupted(interrupt.timeout()));
                        }
                        let outcome = self.run(child, interrupt, recorder).await;
                        recorder.record_unit(child, &outcome);
                        if !outcome.is_passed() {
                            return outcome;
                        }
                    }
                    Outcome::Passed(start.elapsed())
                }
            }
        }
        .boxed()
    }

    async fn run_leaf(&self, action: &dyn TestAction, interrupt: &Interrupt) -> Outcome {
        let ctx = self.ctx.as_ref();

        action.before(ctx).await;

        let start = Instant::now();
        let verdict = tokio::select! {
            biased;
            _ = interrupt.interrupted() => None,
            verdict = action.execute(ctx) => Some(verdict),
        };
        let elapsed = start.elapsed();

        action.after(ctx).await;

        match verdict {
            Some(verdict) => Outcome::from_verdict(verdict, elapsed),
            None => Outcome::Failed(FailureCause::interrupted(interrupt.timeout())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpClient;
    use crate::models::Verdict;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Recording {
        log: Arc<Mutex<Vec<&'static str>>>,
        verdict: Verdict,
    }

    #[async_trait]
    impl TestAction for Recording {
        async fn before(&self, _ctx: &ExecutionContext) {
            self.log.lock().push("before");
        }

        async fn execute(&self, _ctx: &ExecutionContext) -> Verdict {
            self.log.lock().push("execute");
            self.verdict.clone()
        }

        async fn after(&self, _ctx: &ExecutionContext) {
            self.log.lock().push("after");
        }
    }

    struct Hang;

    #[async_trait]
    impl TestAction for Hang {
        async fn execute(&self, _ctx: &ExecutionContext) -> Verdict {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Verdict::Pass
        }
    }

    fn runner() -> TestRunner {
        TestRunner::new(Arc::new(ExecutionContext::new(
            "http://localhost",
            HttpClient::new().unwrap(),
        )))
    }

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, verdict: Verdict) -> Arc<dyn TestAction> {
        Arc::new(Recording {
            log: log.clone(),
            verdict,
        })
    }

    #[tokio::test]
    async fn test_leaf_hook_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let unit = TestUnit::leaf("A", "custom", recording(&log, Verdict::Pass));
        let recorder = RunMap::new();

        let outcome = runner()
            .run(&unit, &Interrupt::new(Duration::from_secs(1)), &recorder)
            .await;

        assert!(outcome.is_passed());
        assert_eq!(*log.lock(), vec!["before", "execute", "after"]);
    }

    #[tokio::test]
    async fn test_interrupt_fails_leaf() {
        let unit = TestUnit::leaf("Stuck", "custom", Arc::new(Hang));
        let interrupt = Interrupt::new(Duration::from_millis(10));
        let recorder = RunMap::new();
        let runner = runner();

        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        match runner.run(&unit, &interrupt, &recorder).await {
            Outcome::Failed(cause) => assert!(cause.is_interruption()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_composite_stops_at_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = TestUnit::leaf("Login", "custom", recording(&log, Verdict::Pass));
        let second = TestUnit::leaf("Pay", "custom", recording(&log, Verdict::fail("http_status", "502")));
        let third = TestUnit::leaf("Logout", "custom", recording(&log, Verdict::Pass));
        let journey = TestUnit::composite("Journey", vec![first, second, third]);

        let recorder = RunMap::for_tests(std::slice::from_ref(&journey));
        let outcome = runner()
            .run(&journey, &Interrupt::new(Duration::from_secs(1)), &recorder)
            .await;

        assert!(matches!(outcome, Outcome::Failed(ref c) if c.kind == "http_status"));
        assert_eq!(recorder.stats_by_name("Login").unwrap().total_runs(), 1);
        assert_eq!(recorder.stats_by_name("Pay").unwrap().failed(), 1);
        assert_eq!(recorder.stats_by_name("Logout").unwrap().executions(), 0);
    }

    #[tokio::test]
    async fn test_composite_skip_propagates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let journey = TestUnit::composite(
            "Journey",
            vec![TestUnit::leaf("Maybe", "custom", recording(&log, Verdict::skip("feature off")))],
        );
        let recorder = RunMap::new();
        let outcome = runner()
            .run(&journey, &Interrupt::new(Duration::from_secs(1)), &recorder)
            .await;
        assert_eq!(outcome, Outcome::Skipped("feature off".to_string()));
    }
}
