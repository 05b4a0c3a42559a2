//! Timeout monitor
//!
//! Sweeps every worker on a fixed cadence and interrupts the ones whose
//! current test has exceeded its own timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::pool::WorkerSet;
use super::worker::SweepResult;

const MIN_CADENCE: Duration = Duration::from_millis(10);
const MAX_CADENCE: Duration = Duration::from_secs(1);

/// Periodic interruption of overrunning tests
pub struct TimeoutMonitor {
    workers: Arc<WorkerSet>,
    cadence: Duration,
}

impl TimeoutMonitor {
    /// Cadence is a tenth of the smallest timeout, kept within sane bounds
    pub fn new(workers: Arc<WorkerSet>, min_timeout: Duration) -> Self {
        Self {
            workers,
            cadence: Self::cadence_for(min_timeout),
        }
    }

    pub fn cadence_for(min_timeout: Duration) -> Duration {
        (min_timeout / 10).clamp(MIN_CADENCE, MAX_CADENCE)
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// One pass over all workers; returns how many were interrupted
    pub fn sweep(&self, now: Instant) -> usize {
        self.workers
            .snapshot()
            .iter()
            .filter(|slot| matches!(slot.interrupt_if_expired(now), SweepResult::Interrupted(_)))
            .count()
    }

    /// Sweep until `stop` is cancelled
    pub async fn run(self, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let interrupted = self.sweep(Instant::now());
                    if interrupted > 0 {
                        debug!("Timeout sweep interrupted {} worker(s)", interrupted);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_bounds() {
        assert_eq!(
            TimeoutMonitor::cadence_for(Duration::from_millis(500)),
            Duration::from_millis(50)
        );
        assert_eq!(TimeoutMonitor::cadence_for(Duration::from_millis(20)), MIN_CADENCE);
        assert_eq!(TimeoutMonitor::cadence_for(Duration::from_secs(180)), MAX_CADENCE);
    }

    #[test]
    fn test_sweep_with_no_workers() {
        let monitor = TimeoutMonitor::new(Arc::new(WorkerSet::new()), Duration::from_secs(1));
        assert_eq!(monitor.sweep(Instant::now()), 0);
    }
}
