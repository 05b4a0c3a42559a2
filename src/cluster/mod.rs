//! Cluster coordination
//!
//! Drivers elect a master among themselves; the master splits each phase
//! across the registered agents, watches them through heartbeats and
//! redistributes the work of agents that fail.

mod client;
mod distributed;
mod driver;
mod election;
mod heartbeat;
mod messages;
mod redistribution;
mod server;
mod splitter;
mod state;

use thiserror::Error;

use crate::http::HttpError;

pub use client::{endpoint, ClusterClient};
pub use driver::Driver;
pub use election::{elect, ElectionOutcome};
pub use messages::{
    AgentFailure, AgentState, AgentStatus, ContentAck, DriverUpdate, ForwardParams,
    PhaseFinished, RegisterAgent, RunProgress, SetupRequest, SubmitTask, HEALTHY,
};
pub use redistribution::{remaining_work, Assignment, WorkTracker};
pub use splitter::PhaseSplitter;
pub use state::{driver_id_from_hostname, CandidateSet, DriverState, Leadership, Role};

/// Cluster communication errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Peer {peer} unreachable: {source}")]
    Unreachable {
        peer: String,
        #[source]
        source: HttpError,
    },

    #[error("Peer {peer} rejected the request with status {status}")]
    Rejected { peer: String, status: u16 },

    #[error("Protocol error: {0}")]
    Protocol(String),
}
