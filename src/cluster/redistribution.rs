//! Work tracking and redistribution
//!
//! The master records which agent runs which sub-phase. Work of an agent
//! that fails is cut down to what is left and queued until an idle agent
//! picks it up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use super::messages::RunProgress;
use crate::models::PhaseSpec;

/// A sub-phase handed to an agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub phase: PhaseSpec,
    pub submitted_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(phase: PhaseSpec) -> Self {
        Self {
            phase,
            submitted_at: Utc::now(),
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.submitted_at).to_std().unwrap_or_default()
    }
}

/// What is left of `phase` once `done` executions have happened and
/// `elapsed` time has passed. `None` when nothing is left.
pub fn remaining_work(
    phase: &PhaseSpec,
    done: &BTreeMap<String, u64>,
    elapsed: Duration,
) -> Option<PhaseSpec> {
    let mut rest = phase.clone();

    if let Some(total) = phase.duration_secs {
        let left = total.saturating_sub(elapsed.as_secs());
        if left == 0 {
            return None;
        }
        rest.duration_secs = Some(left);
    }

    for (name, n) in done {
        *rest.counts.entry(name.clone()).or_insert(0) += n;
    }

    let exhausted: Vec<String> = rest
        .tests
        .iter()
        .filter(|t| rest.remaining(t) == Some(0))
        .map(|t| t.name.clone())
        .collect();
    rest.tests.retain(|t| !exhausted.contains(&t.name));
    rest.counts.retain(|name, _| !exhausted.contains(name));

    if rest.tests.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Distributed run progress held by the master
#[derive(Debug, Default)]
pub struct WorkTracker {
    phase_index: usize,
    phase: Option<String>,
    outstanding: BTreeMap<String, Assignment>,
    pending: VecDeque<PhaseSpec>,
    setup_done: bool,
    setup_error: Option<String>,
    finished: bool,
}

impl WorkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take over the state published by a previous master
    pub fn adopt(&mut self, progress: &RunProgress) {
        self.phase_index = progress.phase_index;
        self.phase = progress.phase.clone();
        self.outstanding = progress.outstanding.clone();
        self.pending = progress.pending.iter().cloned().collect();
        self.setup_done = progress.setup_done;
        self.finished = progress.finished;
    }

    pub fn progress(&self) -> RunProgress {
        RunProgress {
            phase_index: self.phase_index,
            phase: self.phase.clone(),
            outstanding: self.outstanding.clone(),
            pending: self.pending.iter().cloned().collect(),
            setup_done: self.setup_done,
            finished: self.finished,
        }
    }

    pub fn phase_index(&self) -> usize {
        self.phase_index
    }

    pub fn current_phase(&self) -> Option<&str> {
        self.phase.as_deref()
    }

    /// Start tracking phase `index`; nothing is outstanding yet
    pub fn begin_phase(&mut self, index: usize, name: &str) {
        self.phase_index = index;
        self.phase = Some(name.to_string());
        self.outstanding.clear();
        self.pending.clear();
    }

    /// Move past the current phase
    pub fn complete_phase(&mut self) {
        self.phase_index += 1;
        self.phase = None;
        self.outstanding.clear();
        self.pending.clear();
    }

    pub fn assign(&mut self, agent: &str, phase: PhaseSpec) {
        self.outstanding
            .insert(agent.to_string(), Assignment::new(phase));
    }

    /// Agent reported the end of its sub-phase
    pub fn finish(&mut self, agent: &str, phase: &str) -> bool {
        if self.phase.as_deref() != Some(phase) {
            return false;
        }
        self.outstanding.remove(agent).is_some()
    }

    /// Drop the agent's assignment and queue what it left undone
    pub fn orphan(
        &mut self,
        agent: &str,
        done: &BTreeMap<String, u64>,
        now: DateTime<Utc>,
    ) -> Option<PhaseSpec> {
        let assignment = self.outstanding.remove(agent)?;
        let rest = remaining_work(&assignment.phase, done, assignment.elapsed(now))?;
        self.pending.push_back(rest.clone());
        Some(rest)
    }

    pub fn take_pending(&mut self) -> Option<PhaseSpec> {
        self.pending.pop_front()
    }

    /// Put back work that could not be handed out
    pub fn requeue(&mut self, phase: PhaseSpec) {
        self.pending.push_front(phase);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_outstanding(&self, agent: &str) -> bool {
        self.outstanding.contains_key(agent)
    }

    pub fn outstanding_agents(&self) -> Vec<String> {
        self.outstanding.keys().cloned().collect()
    }

    /// Nothing running and nothing waiting
    pub fn phase_complete(&self) -> bool {
        self.outstanding.is_empty() && self.pending.is_empty()
    }

    pub fn setup_done(&self) -> bool {
        self.setup_done
    }

    pub fn set_setup_done(&mut self) {
        self.setup_done = true;
    }

    /// The designated agent reported a failed setup
    pub fn fail_setup(&mut self, reason: impl Into<String>) {
        self.setup_error = Some(reason.into());
    }

    pub fn setup_error(&self) -> Option<&str> {
        self.setup_error.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn mark_finished(&mut self) {
        self.finished = true;
        self.phase = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestSpec;

    fn sub_phase() -> PhaseSpec {
        PhaseSpec::new("load")
            .duration_secs(60)
            .test(TestSpec::new("Browse", "noop"))
            .test(TestSpec::new("Order", "noop").count(10))
    }

    #[test]
    fn test_remaining_work_deducts_counts_and_time() {
        let done = BTreeMap::from([("Order".to_string(), 4)]);
        let rest = remaining_work(&sub_phase(), &done, Duration::from_secs(20)).unwrap();
        assert_eq!(rest.duration_secs, Some(40));
        let order = rest.tests.iter().find(|t| t.name == "Order").unwrap();
        assert_eq!(rest.remaining(order), Some(6));
    }

    #[test]
    fn test_remaining_work_drops_exhausted_tests() {
        let done = BTreeMap::from([("Order".to_string(), 10)]);
        let rest = remaining_work(&sub_phase(), &done, Duration::ZERO).unwrap();
        assert_eq!(rest.tests.len(), 1);
        assert!(rest.counts.is_empty());
    }

    #[test]
    fn test_remaining_work_none_after_duration() {
        assert!(remaining_work(&sub_phase(), &BTreeMap::new(), Duration::from_secs(61)).is_none());

        let counted = PhaseSpec::new("once").test(TestSpec::new("Seed", "noop").count(3));
        let done = BTreeMap::from([("Seed".to_string(), 3)]);
        assert!(remaining_work(&counted, &done, Duration::from_secs(500)).is_none());
    }

    #[test]
    fn test_finish_and_complete() {
        let mut tracker = WorkTracker::new();
        tracker.begin_phase(0, "load");
        tracker.assign("a", sub_phase());
        tracker.assign("b", sub_phase());
        assert!(!tracker.phase_complete());

        assert!(!tracker.finish("a", "warmup"));
        assert!(tracker.finish("a", "load"));
        assert!(!tracker.finish("a", "load"));
        assert!(tracker.finish("b", "load"));
        assert!(tracker.phase_complete());

        tracker.complete_phase();
        assert_eq!(tracker.phase_index(), 1);
        assert!(tracker.current_phase().is_none());
    }

    #[test]
    fn test_orphaned_work_is_queued() {
        let mut tracker = WorkTracker::new();
        tracker.begin_phase(0, "load");
        tracker.assign("a", sub_phase());

        let done = BTreeMap::from([("Order".to_string(), 3)]);
        let rest = tracker.orphan("a", &done, Utc::now()).unwrap();
        assert!(!tracker.is_outstanding("a"));
        assert!(tracker.has_pending());
        assert!(!tracker.phase_complete());

        let taken = tracker.take_pending().unwrap();
        assert_eq!(taken, rest);
        assert!(tracker.phase_complete());

        tracker.requeue(taken);
        assert!(tracker.has_pending());
        assert!(tracker.orphan("unknown", &BTreeMap::new(), Utc::now()).is_none());
    }

    #[test]
    fn test_progress_roundtrip_through_adopt() {
        let mut tracker = WorkTracker::new();
        tracker.begin_phase(2, "load");
        tracker.assign("a", sub_phase());
        tracker.set_setup_done();

        let mut successor = WorkTracker::new();
        successor.adopt(&tracker.progress());
        assert_eq!(successor.phase_index(), 2);
        assert_eq!(successor.current_phase(), Some("load"));
        assert!(successor.is_outstanding("a"));
        assert!(successor.setup_done());
    }
}
