//! Run modes
//!
//! A run mode decides how many workers execute tests at any point of a
//! phase. `Normal` keeps a fixed pool; `Ramp` moves the pool size towards a
//! target by `rate` workers every interval.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_concurrency() -> usize {
    10
}

fn default_rate() -> usize {
    1
}

fn default_interval_secs() -> u64 {
    1
}

/// Concurrency policy of a phase
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunMode {
    /// Fixed number of workers
    Normal {
        #[serde(default = "default_concurrency")]
        concurrency: usize,
        /// Pause between two tests of the same worker
        #[serde(default)]
        wait_time_ms: u64,
    },
    /// Worker count moving from `start` to `end`
    Ramp {
        start: usize,
        end: usize,
        #[serde(default = "default_rate")]
        rate: usize,
        #[serde(default = "default_interval_secs")]
        interval_secs: u64,
        #[serde(default)]
        wait_time_ms: u64,
    },
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Normal {
            concurrency: default_concurrency(),
            wait_time_ms: 0,
        }
    }
}

impl RunMode {
    pub fn normal(concurrency: usize) -> Self {
        RunMode::Normal {
            concurrency,
            wait_time_ms: 0,
        }
    }

    pub fn ramp(start: usize, end: usize, rate: usize, interval: Duration) -> Self {
        RunMode::Ramp {
            start,
            end,
            rate,
            interval_secs: interval.as_secs().max(1),
            wait_time_ms: 0,
        }
    }

    pub fn wait_time(&self) -> Duration {
        match self {
            RunMode::Normal { wait_time_ms, .. } | RunMode::Ramp { wait_time_ms, .. } => {
                Duration::from_millis(*wait_time_ms)
            }
        }
    }

    /// Largest pool size this mode will ever ask for
    pub fn max_workers(&self) -> usize {
        match self {
            RunMode::Normal { concurrency, .. } => *concurrency,
            RunMode::Ramp { start, end, .. } => (*start).max(*end),
        }
    }

    /// Pool size wanted `elapsed` into the phase
    pub fn target_workers(&self, elapsed: Duration) -> usize {
        match self {
            RunMode::Normal { concurrency, .. } => *concurrency,
            RunMode::Ramp {
                start,
                end,
                rate,
                interval_secs,
                ..
            } => {
                let steps = elapsed.as_secs() / (*interval_secs).max(1);
                let delta = (steps as usize).saturating_mul(*rate);
                if end >= start {
                    start.saturating_add(delta).min(*end)
                } else {
                    start.saturating_sub(delta).max(*end)
                }
            }
        }
    }

    /// Interval at which the pool size should be re-evaluated
    pub fn adjust_interval(&self) -> Option<Duration> {
        match self {
            RunMode::Normal { .. } => None,
            RunMode::Ramp { interval_secs, .. } => Some(Duration::from_secs((*interval_secs).max(1))),
        }
    }

    /// Divide this mode across at most `parts` agents. Never more shares
    /// than workers, so every share runs at least one and the shares add
    /// up to the original pool.
    pub fn split(&self, parts: usize) -> Vec<RunMode> {
        let parts = parts.min(self.max_workers()).max(1);
        match self {
            RunMode::Normal {
                concurrency,
                wait_time_ms,
            } => share(*concurrency, parts)
                .into_iter()
                .map(|c| RunMode::Normal {
                    concurrency: c,
                    wait_time_ms: *wait_time_ms,
                })
                .collect(),
            RunMode::Ramp {
                start,
                end,
                rate,
                interval_secs,
                wait_time_ms,
            } => {
                let starts = share(*start, parts);
                let ends = share(*end, parts);
                let rates = share(*rate, parts);
                (0..parts)
                    .map(|i| RunMode::Ramp {
                        start: starts[i],
                        end: ends[i],
                        rate: rates[i].max(1),
                        interval_secs: *interval_secs,
                        wait_time_ms: *wait_time_ms,
                    })
                    .collect()
            }
        }
    }
}

/// Even split of `total` into `parts`, remainder going to the first shares
pub(crate) fn share(total: usize, parts: usize) -> Vec<usize> {
    let base = total / parts;
    let extra = total % parts;
    (0..parts).map(|i| base + usize::from(i < extra)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_is_constant() {
        let mode = RunMode::normal(8);
        assert_eq!(mode.target_workers(Duration::ZERO), 8);
        assert_eq!(mode.target_workers(Duration::from_secs(3600)), 8);
        assert!(mode.adjust_interval().is_none());
    }

    #[test]
    fn test_ramp_up() {
        let mode = RunMode::ramp(2, 10, 3, Duration::from_secs(5));
        assert_eq!(mode.target_workers(Duration::ZERO), 2);
        assert_eq!(mode.target_workers(Duration::from_secs(4)), 2);
        assert_eq!(mode.target_workers(Duration::from_secs(5)), 5);
        assert_eq!(mode.target_workers(Duration::from_secs(10)), 8);
        assert_eq!(mode.target_workers(Duration::from_secs(15)), 10);
        assert_eq!(mode.target_workers(Duration::from_secs(500)), 10);
        assert_eq!(mode.max_workers(), 10);
    }

    #[test]
    fn test_ramp_down() {
        let mode = RunMode::ramp(10, 4, 2, Duration::from_secs(1));
        assert_eq!(mode.target_workers(Duration::from_secs(1)), 8);
        assert_eq!(mode.target_workers(Duration::from_secs(2)), 6);
        assert_eq!(mode.target_workers(Duration::from_secs(10)), 4);
    }

    #[test]
    fn test_share_distributes_remainder() {
        assert_eq!(share(10, 3), vec![4, 3, 3]);
        assert_eq!(share(2, 4), vec![1, 1, 0, 0]);
        assert_eq!(share(0, 2), vec![0, 0]);
    }

    #[test]
    fn test_split_normal() {
        let shares = RunMode::normal(10).split(3);
        let total: usize = shares.iter().map(|m| m.max_workers()).sum();
        assert_eq!(total, 10);
        assert_eq!(RunMode::normal(1).split(2), vec![RunMode::normal(1)]);
    }

    #[test]
    fn test_split_never_exceeds_pool() {
        let shares = RunMode::normal(2).split(5);
        assert_eq!(shares.len(), 2);
        assert!(shares.iter().all(|m| m.max_workers() == 1));

        let shares = RunMode::ramp(1, 3, 1, Duration::from_secs(5)).split(4);
        assert_eq!(shares.len(), 3);
        let peak: usize = shares.iter().map(|m| m.max_workers()).sum();
        assert_eq!(peak, 3);
    }

    #[test]
    fn test_run_mode_yaml() {
        let mode: RunMode = serde_yaml::from_str("type: ramp\nstart: 1\nend: 20\n").unwrap();
        assert_eq!(
            mode,
            RunMode::Ramp {
                start: 1,
                end: 20,
                rate: 1,
                interval_secs: 1,
                wait_time_ms: 0
            }
        );
        let default: RunMode = serde_yaml::from_str("type: normal\n").unwrap();
        assert_eq!(default, RunMode::default());
    }
}
