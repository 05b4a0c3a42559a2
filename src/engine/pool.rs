//! Worker pool
//!
//! Spawns worker tasks and adjusts their number on request. Every slot ever
//! created stays registered in the shared [`WorkerSet`] so the aggregator
//! can still drain the recorder of a worker that was retired mid-phase.

use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::worker::{run_worker, WorkerContext, WorkerSlot};
use crate::models::TestUnit;
use crate::stats::RunMap;

/// Slots shared with the timeout monitor and the aggregator
#[derive(Default)]
pub struct WorkerSet {
    slots: RwLock<Vec<Arc<WorkerSlot>>>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, slot: Arc<WorkerSlot>) {
        self.slots.write().push(slot);
    }

    /// Every slot created so far
    pub fn snapshot(&self) -> Vec<Arc<WorkerSlot>> {
        self.slots.read().clone()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

/// Pool of worker tasks for one phase
pub struct WorkerPool {
    ctx: WorkerContext,
    tests: Vec<TestUnit>,
    workers: Arc<WorkerSet>,
    shutdown: CancellationToken,
    running: Vec<(Arc<WorkerSlot>, JoinHandle<()>)>,
    next_id: usize,
}

impl WorkerPool {
    /// `tests` pre-populates each worker recorder so reports keep suite order
    pub fn new(ctx: WorkerContext, tests: Vec<TestUnit>, workers: Arc<WorkerSet>) -> Self {
        Self {
            ctx,
            tests,
            workers,
            shutdown: CancellationToken::new(),
            running: Vec::new(),
            next_id: 0,
        }
    }

    pub fn workers(&self) -> &Arc<WorkerSet> {
        &self.workers
    }

    /// Workers not asked to retire
    pub fn active(&self) -> usize {
        self.running.iter().filter(|(slot, _)| !slot.is_retired()).count()
    }

    /// Whether every worker task has returned
    pub fn all_finished(&self) -> bool {
        self.running.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Grow or shrink to `target` workers. Shrinking retires the newest
    /// workers; each one stops after its current test.
    pub fn resize(&mut self, target: usize) {
        let active = self.active();

        if target > active {
            for _ in active..target {
                self.spawn();
            }
            debug!("Worker pool grown to {}", target);
        } else if target < active {
            let mut excess = active - target;
            for (slot, _) in self.running.iter().rev() {
                if excess == 0 {
                    break;
                }
                if !slot.is_retired() {
                    slot.retire();
                    excess -= 1;
                }
            }
            debug!("Worker pool shrunk to {}", target);
        }
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let recorder = Arc::new(RunMap::for_tests(&self.tests));
        let slot = Arc::new(WorkerSlot::new(id, recorder, &self.shutdown));
        self.workers.register(slot.clone());

        let handle = tokio::spawn(run_worker(slot.clone(), self.ctx.clone()));
        self.running.push((slot, handle));
    }

    /// Retire every worker and wait for all of them to return
    pub async fn shutdown(self) {
        self.shutdown.cancel();

        let handles = self.running.into_iter().map(|(_, handle)| handle);
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Worker task failed: {}", e);
            }
        }
    }
}
