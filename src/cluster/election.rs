//! Leader election
//!
//! Deterministic: a master already known to a peer is adopted, otherwise
//! the lowest valid candidate id wins. No randomness, so an election
//! outcome follows from the failure sequence alone.

use tracing::debug;

use super::messages::DriverUpdate;
use super::state::{CandidateSet, Role};

/// Result of one election round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElectionOutcome {
    pub master_id: i64,
    pub role: Role,
}

/// Decide who is master given the peers' views (empty on re-election).
///
/// A master reported by a peer is adopted unless it has been invalidated
/// locally.
pub fn elect(own_id: i64, peers: &[DriverUpdate], candidates: &mut CandidateSet) -> ElectionOutcome {
    let known = peers
        .iter()
        .filter_map(DriverUpdate::known_master)
        .find(|id| candidates.is_valid(*id));

    let master_id = match known {
        Some(id) => {
            debug!("Adopting master {} reported by peers", id);
            id
        }
        None => candidates.lowest(),
    };

    ElectionOutcome {
        master_id,
        role: if master_id == own_id {
            Role::Master
        } else {
            Role::Candidate
        },
    }
}
