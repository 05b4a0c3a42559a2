//! Configuration module
//!
//! Handles loading and managing configuration.

mod env;
mod file;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use env::{print_env_help, EnvConfig};
pub use file::Configuration;

fn default_target() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_ms() -> u64 {
    180_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_aggregation_interval_ms() -> u64 {
    1000
}

/// Run-wide settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalArgs {
    /// Base URL of the system under load
    #[serde(default = "default_target")]
    pub target: String,

    /// Phase duration when a phase does not set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,

    /// Per-test timeout when a test does not set one
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_aggregation_interval_ms")]
    pub aggregation_interval_ms: u64,

    /// Name reported to the cluster; the system hostname when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Default for GlobalArgs {
    fn default() -> Self {
        Self {
            target: default_target(),
            duration_secs: None,
            timeout_ms: default_timeout_ms(),
            log_level: default_log_level(),
            aggregation_interval_ms: default_aggregation_interval_ms(),
            hostname: None,
        }
    }
}

impl GlobalArgs {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn default_duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_millis(self.aggregation_interval_ms.max(1))
    }

    /// Configured hostname, else the `HOSTNAME` environment variable
    pub fn hostname(&self) -> Option<String> {
        self.hostname
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
    }
}

fn default_nr_drivers() -> usize {
    1
}

fn default_driver_port() -> u16 {
    4000
}

fn default_agent_port() -> u16 {
    4001
}

fn default_driver_url_template() -> String {
    "http://loadswarm-driver-{id}:4000".to_string()
}

fn default_driver_service_url() -> String {
    "http://loadswarm-driver:4000".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

fn default_phase_poll_interval_secs() -> u64 {
    5
}

fn default_agent_heartbeat_misses() -> u32 {
    3
}

fn default_http_retries() -> u32 {
    3
}

fn default_http_timeout_secs() -> u64 {
    10
}

/// Driver and agent settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Total number of drivers taking part in elections
    #[serde(default = "default_nr_drivers")]
    pub nr_drivers: usize,

    /// Explicit driver id; derived from the hostname when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<i64>,

    #[serde(default = "default_driver_port")]
    pub driver_port: u16,

    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    /// URL of driver `{id}`
    #[serde(default = "default_driver_url_template")]
    pub driver_url_template: String,

    /// URL agents use to reach any driver
    #[serde(default = "default_driver_service_url")]
    pub driver_service_url: String,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_phase_poll_interval_secs")]
    pub phase_poll_interval_secs: u64,

    /// Consecutive missed heartbeats before an agent is dropped
    #[serde(default = "default_agent_heartbeat_misses")]
    pub agent_heartbeat_misses: u32,

    /// Attempts per cluster HTTP call
    #[serde(default = "default_http_retries")]
    pub http_retries: u32,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nr_drivers: default_nr_drivers(),
            driver_id: None,
            driver_port: default_driver_port(),
            agent_port: default_agent_port(),
            driver_url_template: default_driver_url_template(),
            driver_service_url: default_driver_service_url(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            phase_poll_interval_secs: default_phase_poll_interval_secs(),
            agent_heartbeat_misses: default_agent_heartbeat_misses(),
            http_retries: default_http_retries(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl ClusterConfig {
    /// Base URL of driver `id`
    pub fn driver_url(&self, id: i64) -> String {
        self.driver_url_template.replace("{id}", &id.to_string())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn phase_poll_interval(&self) -> Duration {
        Duration::from_secs(self.phase_poll_interval_secs.max(1))
    }
}
