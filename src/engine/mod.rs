//! Execution engine
//!
//! Weighted scheduling, the worker pool, timeout enforcement and result
//! aggregation for a single node.

mod aggregator;
mod counts;
mod executor;
mod pool;
mod run_mode;
mod runner;
mod scheduler;
mod timeout;
mod worker;

pub use aggregator::{ResultAggregator, DEFAULT_AGGREGATION_INTERVAL};
pub use counts::{Claim, ExecutionCounts};
pub use executor::{EndReason, Engine, PhaseReport, RunSummary};
pub use pool::{WorkerPool, WorkerSet};
pub use run_mode::RunMode;
pub(crate) use run_mode::share;
pub use runner::TestRunner;
pub use scheduler::{SchedulerError, WeightedScheduler};
pub use timeout::TimeoutMonitor;
pub use worker::{run_worker, Interrupt, SweepResult, WorkerContext, WorkerSlot};
