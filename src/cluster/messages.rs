//! Cluster wire types
//!
//! JSON bodies exchanged between drivers and agents.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::redistribution::Assignment;
use super::state::Role;
use crate::config::{Configuration, GlobalArgs};
use crate::models::{PhaseSpec, TestSpec};

/// Body of the `/health` endpoints
pub const HEALTHY: &str = "healthy";

/// `?forward=true` query flag
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct ForwardParams {
    #[serde(default)]
    pub forward: bool,
}

/// Agent announcing itself
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAgent {
    /// Base URL the drivers use to reach the agent
    pub address: String,
}

/// Agent reporting the end of its sub-phase
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFinished {
    pub agent: String,
    pub phase: String,
    /// Completed executions per test name
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
}

fn default_true() -> bool {
    true
}

/// Agent confirming the one-time setup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentAck {
    pub agent: String,
    #[serde(default = "default_true")]
    pub success: bool,
    /// Why the setup failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An agent is unresponsive
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub agent: String,
}

/// Sub-phase shipped to an agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmitTask {
    pub globals: GlobalArgs,
    pub phase: PhaseSpec,
}

/// One-time setup shipped to the designated agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetupRequest {
    pub globals: GlobalArgs,
    pub tests: Vec<TestSpec>,
    /// Where to send the acknowledgement
    pub ack_url: String,
}

/// What an agent is doing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Running,
    Completed,
}

/// Answer of the agent `/status` endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub state: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Completed executions per test name of the current or last phase
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
}

impl AgentStatus {
    /// Ready for new work
    pub fn is_idle(&self) -> bool {
        self.state != AgentState::Running
    }
}

/// Progress of a distributed run, as seen by the master
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Index of the phase being executed (or next to execute)
    pub phase_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Sub-phases still running, by agent
    #[serde(default)]
    pub outstanding: BTreeMap<String, Assignment>,
    /// Sub-phases waiting for an idle agent
    #[serde(default)]
    pub pending: Vec<PhaseSpec>,
    #[serde(default)]
    pub setup_done: bool,
    #[serde(default)]
    pub finished: bool,
}

/// A driver's view of the cluster (`/driverUpdates`)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverUpdate {
    pub id: i64,
    pub role: Role,
    /// -1 when unknown
    pub master_id: i64,
    #[serde(default)]
    pub invalid_candidates: Vec<i64>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Configuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub progress: RunProgress,
}

impl DriverUpdate {
    pub fn known_master(&self) -> Option<i64> {
        (self.master_id >= 0).then_some(self.master_id)
    }
}
