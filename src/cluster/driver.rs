//! Driver (coordinator) process
//!
//! Owns the cluster state, runs elections and starts the tasks that go
//! with each role: a candidate watches the master, the master heartbeats
//! agents and executes the configured phases across them.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::ClusterClient;
use super::distributed;
use super::election::{elect, ElectionOutcome};
use super::heartbeat;
use super::messages::{DriverUpdate, SubmitTask};
use super::server;
use super::state::{DriverState, Role};
use super::ClusterError;
use crate::config::{ClusterConfig, Configuration};
use crate::http::RetryPolicy;
use crate::models::PhaseSpec;

/// Tasks tied to the current role
#[derive(Default)]
struct RoleTasks {
    watch: Option<CancellationToken>,
    master: Option<CancellationToken>,
    run: Option<CancellationToken>,
}

pub struct Driver {
    state: DriverState,
    cluster: ClusterConfig,
    client: ClusterClient,
    election: tokio::sync::Mutex<()>,
    tasks: Mutex<RoleTasks>,
    shutdown: CancellationToken,
    fatal: Mutex<Option<String>>,
}

impl Driver {
    pub fn new(id: i64, cluster: ClusterConfig, client: ClusterClient) -> Self {
        Self {
            state: DriverState::new(id, cluster.nr_drivers),
            cluster,
            client,
            election: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(RoleTasks::default()),
            shutdown: CancellationToken::new(),
            fatal: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    pub fn client(&self) -> &ClusterClient {
        &self.client
    }

    pub fn id(&self) -> i64 {
        self.state.id()
    }

    /// This driver's own base URL
    pub fn url(&self) -> String {
        self.cluster.driver_url(self.id())
    }

    /// Every other expected driver, by id
    pub fn peers(&self) -> Vec<(i64, String)> {
        (0..self.state.nr_drivers() as i64)
            .filter(|id| *id != self.id())
            .map(|id| (id, self.cluster.driver_url(id)))
            .collect()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stop the process after an unrecoverable error
    fn fail(&self, e: ClusterError) {
        error!("Driver {} cannot continue: {}", self.id(), e);
        *self.fatal.lock() = Some(e.to_string());
        self.shutdown.cancel();
    }

    /// Serve the cluster endpoints, elect a master and run until shut down
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind driver endpoint {addr}"))?;
        info!(
            "Driver {} listening on {} ({} drivers expected)",
            self.id(),
            addr,
            self.state.nr_drivers()
        );

        let driver = self.clone();
        tokio::spawn(async move {
            if let Err(e) = driver.elect().await {
                driver.fail(e);
            }
        });

        let token = self.shutdown.clone();
        axum::serve(listener, server::router(self.clone()))
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("Driver server failed")?;

        if let Some(reason) = self.fatal.lock().take() {
            bail!("Driver stopped: {reason}");
        }
        Ok(())
    }

    async fn query_peers(&self) -> Vec<DriverUpdate> {
        let queries = self.peers().into_iter().map(|(id, url)| async move {
            match self.client.driver_updates(&url).await {
                Ok(update) => Some(update),
                Err(e) => {
                    debug!("No view from driver {}: {}", id, e);
                    None
                }
            }
        });
        join_all(queries).await.into_iter().flatten().collect()
    }

    /// Full election: ask every peer for its view, then decide
    pub fn elect(self: &Arc<Self>) -> BoxFuture<'static, Result<(), ClusterError>> {
        let driver = self.clone();
        async move {
            let _guard = driver.election.lock().await;

            let views = driver.query_peers().await;
            for view in &views {
                if let Some(config) = &view.config {
                    config.validate().map_err(|e| {
                        ClusterError::Protocol(format!(
                            "configuration from driver {} is unusable: {e:#}",
                            view.id
                        ))
                    })?;
                }
                driver.state.merge(view);
            }

            let outcome = elect(driver.id(), &views, &mut driver.state.candidates());
            driver.apply(outcome);
            Ok(())
        }
        .boxed()
    }

    /// Master `failed` is gone; choose among the remaining candidates
    pub fn reelect(self: &Arc<Self>, failed: i64) -> BoxFuture<'static, ()> {
        let driver = self.clone();
        async move {
            let _guard = driver.election.lock().await;
            if driver.state.master_id() != Some(failed) {
                // someone else already moved on
                return;
            }
            let outcome = {
                let mut candidates = driver.state.candidates();
                candidates.invalidate(failed);
                elect(driver.id(), &[], &mut candidates)
            };
            driver.apply(outcome);
        }
        .boxed()
    }

    fn apply(self: &Arc<Self>, outcome: ElectionOutcome) {
        let previous = self.state.set_master(outcome.master_id);
        if previous.master_id != outcome.master_id {
            info!(
                "Driver {} elected {} as master ({})",
                self.id(),
                outcome.master_id,
                outcome.role
            );
        }

        match outcome.role {
            Role::Master if previous.role != Role::Master => self.become_master(),
            Role::Master => {}
            Role::Candidate => self.watch_master(),
        }
    }

    fn become_master(self: &Arc<Self>) {
        let token = self.shutdown.child_token();
        {
            let mut tasks = self.tasks.lock();
            if let Some(watch) = tasks.watch.take() {
                watch.cancel();
            }
            if let Some(old) = tasks.master.replace(token.clone()) {
                old.cancel();
            }
        }

        info!("Driver {} is now master", self.id());
        tokio::spawn(heartbeat::heartbeat_agents(self.clone(), token));
        self.start_run();
    }

    fn watch_master(self: &Arc<Self>) {
        let token = self.shutdown.child_token();
        {
            let mut tasks = self.tasks.lock();
            if let Some(master) = tasks.master.take() {
                master.cancel();
            }
            tasks.run = None;
            if let Some(old) = tasks.watch.replace(token.clone()) {
                old.cancel();
            }
        }
        tokio::spawn(heartbeat::watch_master(self.clone(), token));
    }

    /// Start (or restart) executing the stored configuration; master only
    fn start_run(self: &Arc<Self>) {
        if self.state.config().is_none() {
            return;
        }
        let token = {
            let mut tasks = self.tasks.lock();
            let Some(master) = &tasks.master else {
                return;
            };
            let token = master.child_token();
            if let Some(old) = tasks.run.replace(token.clone()) {
                old.cancel();
            }
            token
        };
        tokio::spawn(distributed::execute(self.clone(), token));
    }

    /// Install a configuration to execute
    pub fn accept_config(self: &Arc<Self>, config: Configuration) {
        info!(
            "Driver {} received configuration with {} phases",
            self.id(),
            config.phases.len()
        );
        self.state.set_config(config);
        if self.state.is_master() {
            self.start_run();
        }
    }

    /// Re-send `body` to every other driver
    pub async fn forward(&self, path: &str, body: &serde_json::Value) {
        let sends = self.peers().into_iter().map(|(id, url)| async move {
            if let Err(e) = self.client.relay(&url, path, body).await {
                warn!("Failed to forward {} to driver {}: {}", path, id, e);
            }
        });
        join_all(sends).await;
    }

    /// Register an agent; a master hands it any queued work
    pub fn add_agent(self: &Arc<Self>, address: &str) {
        if self.state.add_agent(address) {
            info!("Agent {} registered", address);
        }
        if self.state.is_master() {
            let driver = self.clone();
            tokio::spawn(async move { driver.dispatch_pending().await });
        }
    }

    /// Forget an agent; a master requeues what it was running
    pub async fn remove_agent(self: &Arc<Self>, address: &str) {
        let done = self.agent_progress(address);
        if self.state.remove_agent(address) {
            warn!("Agent {} removed from the cluster", address);
        }
        if !self.state.is_master() {
            return;
        }

        let requeued = self.state.work().orphan(address, &done, Utc::now());
        if let Some(rest) = requeued {
            info!(
                "Requeued phase {} work of {} ({} tests left)",
                rest.name,
                address,
                rest.tests.len()
            );
            self.dispatch_pending().await;
        }
    }

    /// Drop an agent that stopped answering and tell the other drivers
    pub async fn agent_lost(self: &Arc<Self>, address: &str) {
        self.remove_agent(address).await;
        let body = serde_json::json!({ "agent": address });
        self.forward("/agentFailure", &body).await;
    }

    /// Counts the agent last reported for the current phase
    pub(crate) fn agent_progress(&self, address: &str) -> BTreeMap<String, u64> {
        let current = self.state.work().current_phase().map(str::to_string);
        match self.state.agent_status(address) {
            Some(status) if status.phase.is_some() && status.phase == current => status.counts,
            _ => BTreeMap::new(),
        }
    }

    /// Ship a sub-phase to an agent
    pub async fn submit(&self, agent: &str, phase: &PhaseSpec) -> Result<(), ClusterError> {
        let globals = self
            .state
            .config()
            .map(|c| c.globals)
            .unwrap_or_default();
        let task = SubmitTask {
            globals,
            phase: phase.clone(),
        };
        self.client.submit_task(agent, &task).await
    }

    /// A registered agent with nothing assigned that reports itself idle
    async fn find_idle_agent(&self) -> Option<String> {
        let once = self.client.with_retry(RetryPolicy::once());
        for agent in self.state.agents() {
            if self.state.work().is_outstanding(&agent) {
                continue;
            }
            match once.agent_status(&agent).await {
                Ok(status) if status.is_idle() => return Some(agent),
                Ok(_) => {}
                Err(e) => debug!("Agent {} not available: {}", agent, e),
            }
        }
        None
    }

    /// Hand queued sub-phases to idle agents
    pub async fn dispatch_pending(&self) {
        loop {
            let next = self.state.work().take_pending();
            let Some(spec) = next else {
                return;
            };

            let Some(agent) = self.find_idle_agent().await else {
                debug!("No idle agent for queued {} work", spec.name);
                self.state.work().requeue(spec);
                return;
            };

            match self.submit(&agent, &spec).await {
                Ok(()) => {
                    info!("Redistributed phase {} work to {}", spec.name, agent);
                    self.state.work().assign(&agent, spec);
                }
                Err(e) => {
                    warn!("Failed to hand queued work to {}: {}", agent, e);
                    self.state.work().requeue(spec);
                    return;
                }
            }
        }
    }
}
