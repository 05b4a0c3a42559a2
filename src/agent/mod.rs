//! Agent process
//!
//! Runs sub-phases shipped by the master driver on a local engine and
//! reports their completion back to the driver service.

mod server;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::{
    AgentState, AgentStatus, ClusterClient, ContentAck, PhaseFinished, SetupRequest, SubmitTask,
};
use crate::engine::Engine;
use crate::models::Phase;
use crate::publish::Publisher;
use crate::registry::TestRegistry;

pub use server::router;

/// Pause between registration attempts
const REGISTER_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Reasons a task is refused
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent is already running phase {0}")]
    Busy(String),

    #[error("Invalid task: {0:#}")]
    Invalid(anyhow::Error),
}

#[derive(Default)]
struct Task {
    state: AgentState,
    name: Option<String>,
    running: Option<Arc<Phase>>,
    counts: BTreeMap<String, u64>,
}

pub struct Agent {
    address: String,
    driver_url: String,
    registry: Arc<TestRegistry>,
    publishers: Vec<Arc<dyn Publisher>>,
    client: ClusterClient,
    task: Mutex<Task>,
    shutdown: CancellationToken,
}

impl Agent {
    /// `address` is the URL drivers use to reach this agent
    pub fn new(
        address: impl Into<String>,
        driver_url: impl Into<String>,
        registry: Arc<TestRegistry>,
        publishers: Vec<Arc<dyn Publisher>>,
        client: ClusterClient,
    ) -> Self {
        Self {
            address: address.into(),
            driver_url: driver_url.into(),
            registry,
            publishers,
            client,
            task: Mutex::new(Task::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Current state, with live counts while a phase runs
    pub fn status(&self) -> AgentStatus {
        let task = self.task.lock();
        let counts = match &task.running {
            Some(phase) => phase.counts().snapshot(),
            None => task.counts.clone(),
        };
        AgentStatus {
            state: task.state,
            phase: task.name.clone(),
            counts,
        }
    }

    /// Accept a sub-phase and run it in the background
    pub fn submit(self: &Arc<Self>, task: SubmitTask) -> Result<(), AgentError> {
        let engine = Engine::new(task.globals, self.registry.clone(), self.publishers.clone())
            .map_err(AgentError::Invalid)?;

        let phase = {
            let mut current = self.task.lock();
            if current.state == AgentState::Running {
                return Err(AgentError::Busy(current.name.clone().unwrap_or_default()));
            }
            let phase = Arc::new(engine.build_phase(&task.phase).map_err(AgentError::Invalid)?);
            *current = Task {
                state: AgentState::Running,
                name: Some(phase.name().to_string()),
                running: Some(phase.clone()),
                counts: BTreeMap::new(),
            };
            phase
        };

        info!("Accepted phase {} ({} tests)", phase.name(), phase.tests().len());
        let agent = self.clone();
        tokio::spawn(async move {
            let report = engine.run_phase(&phase).await;
            {
                let mut current = agent.task.lock();
                current.state = AgentState::Completed;
                current.running = None;
                current.counts = report.counts.clone();
            }

            let finished = PhaseFinished {
                agent: agent.address.clone(),
                phase: report.name,
                counts: report.counts,
            };
            if let Err(e) = agent
                .client
                .phase_finished(&agent.driver_url, &finished, true)
                .await
            {
                warn!("Could not report end of phase {}: {}", finished.phase, e);
            }
        });
        Ok(())
    }

    /// Run the one-time setup in the background, then acknowledge it
    pub fn setup(self: &Arc<Self>, request: SetupRequest) -> Result<(), AgentError> {
        let engine = Engine::new(request.globals, self.registry.clone(), Vec::new())
            .map_err(AgentError::Invalid)?;

        info!("Running {} setup tests", request.tests.len());
        let agent = self.clone();
        tokio::spawn(async move {
            let ack = match engine.run_setup(&request.tests).await {
                Ok(()) => ContentAck {
                    agent: agent.address.clone(),
                    success: true,
                    error: None,
                },
                Err(e) => {
                    error!("Setup failed: {:#}", e);
                    ContentAck {
                        agent: agent.address.clone(),
                        success: false,
                        error: Some(format!("{e:#}")),
                    }
                }
            };
            if let Err(e) = agent.client.content_ack(&request.ack_url, &ack).await {
                warn!("Could not acknowledge setup: {}", e);
            }
        });
        Ok(())
    }

    /// Announce this agent to the drivers until one of them accepts
    pub async fn register(&self) -> bool {
        loop {
            match self
                .client
                .register_agent(&self.driver_url, &self.address, true)
                .await
            {
                Ok(()) => {
                    info!("Registered {} at {}", self.address, self.driver_url);
                    return true;
                }
                Err(e) => warn!("Registration at {} failed: {}", self.driver_url, e),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(REGISTER_RETRY_DELAY) => {}
            }
        }
    }

    /// Serve the agent endpoints and register with the drivers
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind agent endpoint {addr}"))?;
        info!("Agent {} listening on {}", self.address, addr);

        let agent = self.clone();
        tokio::spawn(async move { agent.register().await });

        let token = self.shutdown.clone();
        axum::serve(listener, router(self.clone()))
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("Agent server failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalArgs;
    use crate::engine::RunMode;
    use crate::http::{HttpClient, RetryPolicy};
    use crate::models::{PhaseSpec, TestSpec};

    fn agent() -> Arc<Agent> {
        let client = ClusterClient::new(
            HttpClient::with_timeout(1).unwrap(),
            RetryPolicy::new(1, Duration::ZERO),
        );
        Arc::new(Agent::new(
            "http://127.0.0.1:4001",
            "http://127.0.0.1:9",
            Arc::new(TestRegistry::with_builtins()),
            Vec::new(),
            client,
        ))
    }

    fn task(count: u64) -> SubmitTask {
        SubmitTask {
            globals: GlobalArgs::default(),
            phase: PhaseSpec::new("load")
                .run_mode(RunMode::normal(2))
                .test(TestSpec::new("Ping", "noop").count(count)),
        }
    }

    #[test]
    fn test_idle_status() {
        let status = agent().status();
        assert_eq!(status.state, AgentState::Idle);
        assert!(status.phase.is_none());
    }

    #[tokio::test]
    async fn test_submitted_phase_completes() {
        let agent = agent();
        agent.submit(task(20)).unwrap();
        assert_eq!(agent.status().state, AgentState::Running);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while agent.status().state != AgentState::Completed {
            assert!(tokio::time::Instant::now() < deadline, "phase did not finish");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let status = agent.status();
        assert_eq!(status.phase.as_deref(), Some("load"));
        assert_eq!(status.counts.get("Ping"), Some(&20));
    }

    #[tokio::test]
    async fn test_busy_agent_refuses_task() {
        let agent = agent();
        let long = SubmitTask {
            globals: GlobalArgs::default(),
            phase: PhaseSpec::new("soak")
                .duration_secs(30)
                .test(TestSpec::new("Nap", "sleep").property("millis", 50)),
        };
        agent.submit(long).unwrap();
        assert!(matches!(agent.submit(task(1)), Err(AgentError::Busy(_))));
    }

    #[test]
    fn test_unknown_kind_is_invalid() {
        let agent = agent();
        let bad = SubmitTask {
            globals: GlobalArgs::default(),
            phase: PhaseSpec::new("load").test(TestSpec::new("X", "teleport")),
        };
        assert!(matches!(agent.submit(bad), Err(AgentError::Invalid(_))));
        assert_eq!(agent.status().state, AgentState::Idle);
    }
}
