//! Phase splitting
//!
//! Divides a phase into one sub-phase per agent. Concurrency and count
//! limits are divided evenly, the remainder going to the first agents;
//! unbounded tests and the duration are shared by every sub-phase. With
//! more agents than workers, only as many agents as there are workers get
//! a share. Summing the sub-phases gives back the original workload.

use std::collections::BTreeMap;

use crate::engine::share;
use crate::models::PhaseSpec;

pub struct PhaseSplitter;

impl PhaseSplitter {
    /// Map of agent address to its sub-phase. Agents whose share would
    /// contain no test are left out.
    pub fn split(phase: &PhaseSpec, agents: &[String]) -> BTreeMap<String, PhaseSpec> {
        let mut result = BTreeMap::new();
        if agents.is_empty() {
            return result;
        }

        let modes = phase.run_mode.split(agents.len());
        let parts = modes.len();
        let shares: Vec<Option<Vec<usize>>> = phase
            .tests
            .iter()
            .map(|test| phase.remaining(test).map(|left| share(left as usize, parts)))
            .collect();

        for (i, agent) in agents.iter().take(parts).enumerate() {
            let tests: Vec<_> = phase
                .tests
                .iter()
                .zip(&shares)
                .filter_map(|(test, shares)| match shares {
                    None => Some(test.clone()),
                    Some(shares) if shares[i] > 0 => {
                        let mut test = test.clone();
                        test.count = Some(shares[i] as u64);
                        Some(test)
                    }
                    Some(_) => None,
                })
                .collect();

            if tests.is_empty() {
                continue;
            }

            result.insert(
                agent.clone(),
                PhaseSpec {
                    name: phase.name.clone(),
                    measurable: phase.measurable,
                    duration_secs: phase.duration_secs,
                    tests,
                    run_mode: modes[i].clone(),
                    publish_mode: phase.publish_mode.clone(),
                    counts: BTreeMap::new(),
                },
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RunMode;
    use crate::models::TestSpec;

    fn agents(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://agent-{i}:4001")).collect()
    }

    fn phase() -> PhaseSpec {
        PhaseSpec::new("load")
            .duration_secs(60)
            .run_mode(RunMode::normal(10))
            .test(TestSpec::new("Browse", "noop").weight(4))
            .test(TestSpec::new("Order", "noop").count(7))
            .test(TestSpec::new("Refund", "noop").count(2))
    }

    fn total_count(parts: &BTreeMap<String, PhaseSpec>, name: &str) -> u64 {
        parts
            .values()
            .flat_map(|p| p.tests.iter())
            .filter(|t| t.name == name)
            .filter_map(|t| t.count)
            .sum()
    }

    #[test]
    fn test_no_agents() {
        assert!(PhaseSplitter::split(&phase(), &[]).is_empty());
    }

    #[test]
    fn test_union_reconstructs_workload() {
        let parts = PhaseSplitter::split(&phase(), &agents(3));
        assert_eq!(parts.len(), 3);

        assert_eq!(total_count(&parts, "Order"), 7);
        assert_eq!(total_count(&parts, "Refund"), 2);

        let concurrency: usize = parts.values().map(|p| p.run_mode.max_workers()).sum();
        assert_eq!(concurrency, 10);

        for part in parts.values() {
            assert_eq!(part.duration_secs, Some(60));
            assert!(part.tests.iter().any(|t| t.name == "Browse" && t.count.is_none()));
        }
    }

    #[test]
    fn test_more_agents_than_workers() {
        let phase = PhaseSpec::new("load")
            .duration_secs(60)
            .run_mode(RunMode::normal(2))
            .test(TestSpec::new("Browse", "noop"))
            .test(TestSpec::new("Order", "noop").count(9));
        let parts = PhaseSplitter::split(&phase, &agents(5));

        assert_eq!(parts.len(), 2);
        let concurrency: usize = parts.values().map(|p| p.run_mode.max_workers()).sum();
        assert_eq!(concurrency, 2);
        assert_eq!(total_count(&parts, "Order"), 9);
        assert!(parts.contains_key("http://agent-0:4001"));
        assert!(parts.contains_key("http://agent-1:4001"));
    }

    #[test]
    fn test_zero_shares_are_dropped() {
        let parts = PhaseSplitter::split(&phase(), &agents(3));
        let refunds = parts
            .values()
            .filter(|p| p.tests.iter().any(|t| t.name == "Refund"))
            .count();
        assert_eq!(refunds, 2);
    }

    #[test]
    fn test_done_counts_are_deducted() {
        let mut phase = phase();
        phase.counts.insert("Order".to_string(), 5);
        let parts = PhaseSplitter::split(&phase, &agents(2));
        assert_eq!(total_count(&parts, "Order"), 2);
        assert!(parts.values().all(|p| p.counts.is_empty()));
    }

    #[test]
    fn test_agent_without_work_is_skipped() {
        let phase = PhaseSpec::new("once")
            .run_mode(RunMode::normal(1))
            .test(TestSpec::new("Migrate", "noop").count(1));
        let parts = PhaseSplitter::split(&phase, &agents(3));
        assert_eq!(parts.len(), 1);
        assert!(parts.contains_key("http://agent-0:4001"));
    }
}
