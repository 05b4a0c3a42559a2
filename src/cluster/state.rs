//! Driver-side cluster state
//!
//! Role and master id live behind one read/write lock; the agent set is a
//! concurrent map keyed by address so registrations are de-duplicated.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::messages::{AgentStatus, DriverUpdate};
use super::redistribution::WorkTracker;
use crate::config::Configuration;

/// Role of a driver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    Candidate,
    Master,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Candidate => write!(f, "CANDIDATE"),
            Role::Master => write!(f, "MASTER"),
        }
    }
}

/// Driver ids eligible for mastership.
///
/// Shrinks as drivers are invalidated and is restored to the full id range
/// exactly when the last valid id goes away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateSet {
    nr_drivers: i64,
    invalid: BTreeSet<i64>,
}

impl CandidateSet {
    pub fn new(nr_drivers: usize) -> Self {
        Self {
            nr_drivers: nr_drivers.max(1) as i64,
            invalid: BTreeSet::new(),
        }
    }

    fn contains(&self, id: i64) -> bool {
        (0..self.nr_drivers).contains(&id)
    }

    /// Exclude `id` from future elections
    pub fn invalidate(&mut self, id: i64) {
        if self.contains(id) {
            self.invalid.insert(id);
        }
    }

    pub fn is_valid(&self, id: i64) -> bool {
        self.contains(id) && !self.invalid.contains(&id)
    }

    /// Ids still eligible
    pub fn valid(&self) -> BTreeSet<i64> {
        (0..self.nr_drivers)
            .filter(|id| !self.invalid.contains(id))
            .collect()
    }

    pub fn invalid(&self) -> Vec<i64> {
        self.invalid.iter().copied().collect()
    }

    /// Lowest eligible id; resets the set first when it is empty
    pub fn lowest(&mut self) -> i64 {
        if self.valid().is_empty() {
            self.invalid.clear();
        }
        // never empty after the reset above
        self.valid().into_iter().next().unwrap_or(0)
    }
}

/// Role and master as one unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Leadership {
    pub role: Role,
    /// -1 when unknown
    pub master_id: i64,
}

impl Default for Leadership {
    fn default() -> Self {
        Self {
            role: Role::Candidate,
            master_id: -1,
        }
    }
}

/// What the driver knows about one agent
#[derive(Clone, Debug, Default)]
pub struct AgentRecord {
    /// Consecutive failed heartbeats
    pub misses: u32,
    pub last_status: Option<AgentStatus>,
}

/// Everything a driver tracks about the cluster
pub struct DriverState {
    id: i64,
    nr_drivers: usize,
    leadership: RwLock<Leadership>,
    candidates: Mutex<CandidateSet>,
    agents: DashMap<String, AgentRecord>,
    config: RwLock<Option<Configuration>>,
    work: Mutex<WorkTracker>,
}

impl DriverState {
    pub fn new(id: i64, nr_drivers: usize) -> Self {
        Self {
            id,
            nr_drivers: nr_drivers.max(1),
            leadership: RwLock::new(Leadership::default()),
            candidates: Mutex::new(CandidateSet::new(nr_drivers)),
            agents: DashMap::new(),
            config: RwLock::new(None),
            work: Mutex::new(WorkTracker::new()),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn nr_drivers(&self) -> usize {
        self.nr_drivers
    }

    pub fn leadership(&self) -> Leadership {
        *self.leadership.read()
    }

    pub fn is_master(&self) -> bool {
        self.leadership.read().role == Role::Master
    }

    pub fn master_id(&self) -> Option<i64> {
        let id = self.leadership.read().master_id;
        (id >= 0).then_some(id)
    }

    /// Install a new master; returns the previous leadership
    pub fn set_master(&self, master_id: i64) -> Leadership {
        let role = if master_id == self.id {
            Role::Master
        } else {
            Role::Candidate
        };
        let mut leadership = self.leadership.write();
        std::mem::replace(&mut *leadership, Leadership { role, master_id })
    }

    pub fn candidates(&self) -> parking_lot::MutexGuard<'_, CandidateSet> {
        self.candidates.lock()
    }

    /// Register an agent; false when it was already known
    pub fn add_agent(&self, address: &str) -> bool {
        if self.agents.contains_key(address) {
            return false;
        }
        self.agents
            .insert(address.to_string(), AgentRecord::default())
            .is_none()
    }

    pub fn remove_agent(&self, address: &str) -> bool {
        self.agents.remove(address).is_some()
    }

    pub fn has_agent(&self, address: &str) -> bool {
        self.agents.contains_key(address)
    }

    /// Registered agent addresses, sorted
    pub fn agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        agents.sort();
        agents
    }

    /// Note a heartbeat answer; resets the miss counter
    pub fn agent_alive(&self, address: &str, status: AgentStatus) {
        if let Some(mut record) = self.agents.get_mut(address) {
            record.misses = 0;
            record.last_status = Some(status);
        }
    }

    /// Note a missed heartbeat; returns the consecutive miss count
    pub fn agent_missed(&self, address: &str) -> u32 {
        match self.agents.get_mut(address) {
            Some(mut record) => {
                record.misses += 1;
                record.misses
            }
            None => 0,
        }
    }

    pub fn agent_status(&self, address: &str) -> Option<AgentStatus> {
        self.agents
            .get(address)
            .and_then(|record| record.last_status.clone())
    }

    pub fn config(&self) -> Option<Configuration> {
        self.config.read().clone()
    }

    /// Install a configuration to execute; resets the run progress
    pub fn set_config(&self, config: Configuration) {
        *self.config.write() = Some(config);
        *self.work.lock() = WorkTracker::new();
    }

    pub fn work(&self) -> parking_lot::MutexGuard<'_, WorkTracker> {
        self.work.lock()
    }

    /// This driver's view, as served on `/driverUpdates`
    pub fn update(&self) -> DriverUpdate {
        let leadership = self.leadership();
        let progress = self.work.lock().progress();
        DriverUpdate {
            id: self.id,
            role: leadership.role,
            master_id: leadership.master_id,
            invalid_candidates: self.candidates.lock().invalid(),
            agents: self.agents(),
            config: self.config(),
            current_phase: progress.phase.clone(),
            progress,
        }
    }

    /// Fold a peer's view into ours: agents and invalid candidates are
    /// unioned, configuration and progress adopted when we have none.
    pub fn merge(&self, peer: &DriverUpdate) {
        for agent in &peer.agents {
            self.add_agent(agent);
        }
        {
            let mut candidates = self.candidates.lock();
            for id in &peer.invalid_candidates {
                candidates.invalidate(*id);
            }
        }
        if let Some(config) = &peer.config {
            let mut current = self.config.write();
            if current.is_none() {
                *current = Some(config.clone());
                self.work.lock().adopt(&peer.progress);
            }
        }
    }
}

/// Driver id from the trailing digits of a hostname (`loadswarm-driver-2`)
pub fn driver_id_from_hostname(hostname: &str) -> Option<i64> {
    let digits: String = hostname
        .trim()
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}
