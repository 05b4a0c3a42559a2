//! Distributed phase execution
//!
//! Run by the master: optional one-time setup on one agent, then every
//! phase split across the registered agents. A phase is done once every
//! sub-phase has been reported finished and nothing is left queued.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::driver::Driver;
use super::messages::{AgentState, SetupRequest};
use super::splitter::PhaseSplitter;
use crate::config::Configuration;
use crate::http::RetryPolicy;
use crate::models::PhaseSpec;

/// Sleep `period` unless stopped first; false when stopped
async fn pause(stop: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

/// Execute the stored configuration from where the cluster left off
pub async fn execute(driver: Arc<Driver>, stop: CancellationToken) {
    let Some(config) = driver.state().config() else {
        return;
    };
    if driver.state().work().is_finished() {
        debug!("Configuration already executed");
        return;
    }

    reconcile(&driver).await;

    if !config.setup.is_empty() && !driver.state().work().setup_done() {
        match run_setup(&driver, &config, &stop).await {
            Some(true) => {}
            Some(false) => {
                driver.state().work().mark_finished();
                return;
            }
            None => return,
        }
    }

    let poll = driver.cluster().phase_poll_interval();
    loop {
        let (index, inherited) = {
            let work = driver.state().work();
            (work.phase_index(), work.current_phase().map(str::to_string))
        };

        let Some(spec) = config.phases.get(index) else {
            driver.state().work().mark_finished();
            info!("Distributed run finished ({} phases)", config.phases.len());
            return;
        };

        if inherited.as_deref() != Some(spec.name.as_str()) {
            let Some(agents) = wait_for_agents(&driver, &stop, poll).await else {
                return;
            };

            let parts = PhaseSplitter::split(spec, &agents);
            info!(
                "Starting phase {} on {} of {} agents",
                spec.name,
                parts.len(),
                agents.len()
            );
            driver.state().work().begin_phase(index, &spec.name);

            for (agent, sub_phase) in parts {
                let submitted = driver.submit(&agent, &sub_phase).await;
                if let Err(e) = &submitted {
                    warn!("Agent {} did not take phase {}: {}", agent, spec.name, e);
                }
                assign(&driver, &agent, sub_phase, submitted.is_ok());
            }
        } else {
            info!("Resuming phase {}", spec.name);
        }

        loop {
            driver.dispatch_pending().await;
            poll_outstanding(&driver, &spec.name).await;

            if driver.state().work().phase_complete() {
                break;
            }
            if !pause(&stop, poll).await {
                return;
            }
        }

        info!("Phase {} finished on every agent", spec.name);
        driver.state().work().complete_phase();
    }
}

/// Record the sub-phase; work an agent refused goes straight to the queue
fn assign(driver: &Driver, agent: &str, sub_phase: PhaseSpec, accepted: bool) {
    let mut work = driver.state().work();
    work.assign(agent, sub_phase);
    if !accepted {
        work.orphan(agent, &BTreeMap::new(), Utc::now());
    }
}

async fn wait_for_agents(
    driver: &Driver,
    stop: &CancellationToken,
    poll: Duration,
) -> Option<Vec<String>> {
    loop {
        let agents = driver.state().agents();
        if !agents.is_empty() {
            return Some(agents);
        }
        debug!("Waiting for agents to register");
        if !pause(stop, poll).await {
            return None;
        }
    }
}

/// Ship the setup tests to one agent and wait for its acknowledgement.
/// `Some(false)` when the setup failed, `None` when stopped.
async fn run_setup(
    driver: &Driver,
    config: &Configuration,
    stop: &CancellationToken,
) -> Option<bool> {
    let poll = driver.cluster().phase_poll_interval();
    let request = SetupRequest {
        globals: config.globals.clone(),
        tests: config.setup.clone(),
        ack_url: format!("{}/contentAck", driver.url()),
    };

    loop {
        let agents = wait_for_agents(driver, stop, poll).await?;
        let agent = &agents[0];
        match driver.client().setup(agent, &request).await {
            Ok(()) => {
                info!("Setup sent to {}", agent);
                break;
            }
            Err(e) => {
                warn!("Agent {} did not take the setup: {}", agent, e);
                if !pause(stop, poll).await {
                    return None;
                }
            }
        }
    }

    loop {
        {
            let work = driver.state().work();
            if work.setup_done() {
                info!("Setup acknowledged");
                return Some(true);
            }
            if let Some(reason) = work.setup_error() {
                error!("Setup failed, run aborted: {}", reason);
                return Some(false);
            }
        }
        if !pause(stop, poll).await {
            return None;
        }
    }
}

/// Liveness poll: agents that finished without their report reaching us
async fn poll_outstanding(driver: &Driver, phase: &str) {
    let client = driver.client().with_retry(RetryPolicy::once());
    let outstanding = driver.state().work().outstanding_agents();

    for agent in outstanding {
        match client.agent_status(&agent).await {
            Ok(status) => {
                let finished = status.state == AgentState::Completed
                    && status.phase.as_deref() == Some(phase);
                driver.state().agent_alive(&agent, status);
                if finished && driver.state().work().finish(&agent, phase) {
                    debug!("Agent {} completed phase {}", agent, phase);
                }
            }
            Err(e) => debug!("Status of {} unavailable: {}", agent, e),
        }
    }
}

/// Settle assignments inherited from a previous master
async fn reconcile(driver: &Arc<Driver>) {
    let (phase, outstanding) = {
        let work = driver.state().work();
        (
            work.current_phase().map(str::to_string),
            work.outstanding_agents(),
        )
    };
    let Some(phase) = phase else {
        return;
    };

    let client = driver.client().with_retry(RetryPolicy::once());
    for agent in outstanding {
        if !driver.state().has_agent(&agent) {
            driver.state().work().orphan(&agent, &BTreeMap::new(), Utc::now());
            continue;
        }
        match client.agent_status(&agent).await {
            Ok(status) => {
                let same_phase = status.phase.as_deref() == Some(phase.as_str());
                match status.state {
                    AgentState::Running => {}
                    AgentState::Completed if same_phase => {
                        driver.state().work().finish(&agent, &phase);
                    }
                    _ => {
                        info!("Agent {} lost its phase {} work", agent, phase);
                        driver.state().work().orphan(&agent, &BTreeMap::new(), Utc::now());
                    }
                }
                driver.state().agent_alive(&agent, status);
            }
            Err(e) => debug!("Agent {} unreachable during take-over: {}", agent, e),
        }
    }

    driver.dispatch_pending().await;
}
