//! Cluster HTTP client
//!
//! JSON calls between drivers and agents. Every call gets the configured
//! attempts; a peer that never answers is reported as unreachable and
//! left to the caller's failure handling.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use super::messages::{
    AgentFailure, AgentStatus, ContentAck, DriverUpdate, PhaseFinished, RegisterAgent,
    RunProgress, SetupRequest, SubmitTask,
};
use super::ClusterError;
use crate::config::{ClusterConfig, Configuration};
use crate::http::{HttpClient, HttpError, RetryPolicy};

/// `base` + `path`, with `?forward=true` when asked
pub fn endpoint(base: &str, path: &str, forward: bool) -> String {
    let base = base.trim_end_matches('/');
    if forward {
        format!("{base}{path}?forward=true")
    } else {
        format!("{base}{path}")
    }
}

/// Sent with every cluster call
const USER_AGENT: &str = concat!("loadswarm/", env!("CARGO_PKG_VERSION"));

fn unreachable(peer: &str, e: HttpError) -> ClusterError {
    match e {
        HttpError::Status { status, .. } => ClusterError::Rejected {
            peer: peer.to_string(),
            status,
        },
        other => ClusterError::Unreachable {
            peer: peer.to_string(),
            source: other,
        },
    }
}

#[derive(Clone)]
pub struct ClusterClient {
    http: HttpClient,
    retry: RetryPolicy,
}

impl ClusterClient {
    pub fn new(http: HttpClient, retry: RetryPolicy) -> Self {
        Self { http, retry }
    }

    pub fn from_config(config: &ClusterConfig) -> anyhow::Result<Self> {
        let http = HttpClient::with_timeout(config.http_timeout_secs.max(1))?
            .default_header("User-Agent", USER_AGENT)?;
        let retry = RetryPolicy::new(config.http_retries, Duration::from_millis(500));
        Ok(Self::new(http, retry))
    }

    /// Same client, different attempt count
    pub fn with_retry(&self, retry: RetryPolicy) -> Self {
        Self {
            http: self.http.clone(),
            retry,
        }
    }

    async fn get<T: DeserializeOwned>(&self, base: &str, path: &str) -> Result<T, ClusterError> {
        let url = endpoint(base, path, false);
        self.retry
            .execute(|_| self.http.get_json::<T>(&url))
            .await
            .map_err(|e| unreachable(base, e))
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        base: &str,
        path: &str,
        body: &B,
        forward: bool,
    ) -> Result<(), ClusterError> {
        let url = endpoint(base, path, forward);
        self.retry
            .execute(|_| self.http.post_json(&url, body))
            .await
            .map(|_| ())
            .map_err(|e| unreachable(base, e))
    }

    /// POST a raw JSON value to `path`; used to re-broadcast requests
    pub async fn relay(
        &self,
        base: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(), ClusterError> {
        self.post(base, path, body, false).await
    }

    // Driver endpoints

    pub async fn driver_updates(&self, driver: &str) -> Result<DriverUpdate, ClusterError> {
        self.get(driver, "/driverUpdates").await
    }

    pub async fn heartbeat(&self, driver: &str) -> Result<RunProgress, ClusterError> {
        self.get(driver, "/heartbeat").await
    }

    pub async fn nr_drivers(&self, driver: &str) -> Result<usize, ClusterError> {
        self.get(driver, "/getNrDrivers").await
    }

    pub async fn submit_config(
        &self,
        driver: &str,
        config: &Configuration,
        forward: bool,
    ) -> Result<(), ClusterError> {
        self.post(driver, "/config", config, forward).await
    }

    pub async fn register_agent(
        &self,
        driver: &str,
        address: &str,
        forward: bool,
    ) -> Result<(), ClusterError> {
        let body = RegisterAgent {
            address: address.to_string(),
        };
        self.post(driver, "/registerAgent", &body, forward).await
    }

    pub async fn phase_finished(
        &self,
        driver: &str,
        body: &PhaseFinished,
        forward: bool,
    ) -> Result<(), ClusterError> {
        self.post(driver, "/phaseFinished", body, forward).await
    }

    /// Acknowledge a setup at the full `url` given in the request
    pub async fn content_ack(&self, url: &str, body: &ContentAck) -> Result<(), ClusterError> {
        self.post(url, "", body, false).await
    }

    pub async fn agent_failure(
        &self,
        driver: &str,
        agent: &str,
        forward: bool,
    ) -> Result<(), ClusterError> {
        let body = AgentFailure {
            agent: agent.to_string(),
        };
        self.post(driver, "/agentFailure", &body, forward).await
    }

    // Agent endpoints

    pub async fn agent_status(&self, agent: &str) -> Result<AgentStatus, ClusterError> {
        self.get(agent, "/status").await
    }

    pub async fn submit_task(&self, agent: &str, task: &SubmitTask) -> Result<(), ClusterError> {
        self.post(agent, "/submitTask", task, false).await
    }

    pub async fn setup(&self, agent: &str, request: &SetupRequest) -> Result<(), ClusterError> {
        self.post(agent, "/setup", request, false).await
    }
}
