//! Driver HTTP endpoints
//!
//! Requests carrying `?forward=true` are handled locally, then re-sent to
//! every other driver (without the flag) before the response goes out.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::driver::Driver;
use super::messages::{
    AgentFailure, ContentAck, DriverUpdate, ForwardParams, PhaseFinished, RegisterAgent,
    RunProgress, HEALTHY,
};
use crate::config::Configuration;

type SharedDriver = Arc<Driver>;

pub fn router(driver: SharedDriver) -> Router {
    Router::new()
        .route("/config", post(config_handler))
        .route("/registerAgent", post(register_agent_handler))
        .route("/phaseFinished", post(phase_finished_handler))
        .route("/health", get(health_handler))
        .route("/contentAck", post(content_ack_handler))
        .route("/masterElection", post(master_election_handler))
        .route("/driverUpdates", get(driver_updates_handler))
        .route("/getNrDrivers", get(nr_drivers_handler))
        .route("/heartbeat", get(heartbeat_handler))
        .route("/agentFailure", post(agent_failure_handler))
        .with_state(driver)
}

async fn forward_if<T: Serialize>(driver: &Driver, params: ForwardParams, path: &str, body: &T) {
    if !params.forward {
        return;
    }
    match serde_json::to_value(body) {
        Ok(value) => driver.forward(path, &value).await,
        Err(e) => error!("Cannot forward {}: {}", path, e),
    }
}

async fn config_handler(
    State(driver): State<SharedDriver>,
    Query(params): Query<ForwardParams>,
    Json(config): Json<Configuration>,
) -> Result<StatusCode, (StatusCode, String)> {
    if let Err(e) = config.validate() {
        warn!("Rejected configuration: {:#}", e);
        return Err((StatusCode::BAD_REQUEST, format!("{e:#}")));
    }

    driver.accept_config(config.clone());
    forward_if(&driver, params, "/config", &config).await;
    Ok(StatusCode::ACCEPTED)
}

async fn register_agent_handler(
    State(driver): State<SharedDriver>,
    Query(params): Query<ForwardParams>,
    Json(request): Json<RegisterAgent>,
) -> StatusCode {
    driver.add_agent(&request.address);
    forward_if(&driver, params, "/registerAgent", &request).await;
    StatusCode::OK
}

async fn phase_finished_handler(
    State(driver): State<SharedDriver>,
    Query(params): Query<ForwardParams>,
    Json(report): Json<PhaseFinished>,
) -> StatusCode {
    if driver.state().work().finish(&report.agent, &report.phase) {
        info!(
            "Agent {} finished phase {} ({} runs)",
            report.agent,
            report.phase,
            report.counts.values().sum::<u64>()
        );
    }
    forward_if(&driver, params, "/phaseFinished", &report).await;
    StatusCode::OK
}

async fn health_handler() -> &'static str {
    HEALTHY
}

async fn content_ack_handler(
    State(driver): State<SharedDriver>,
    Json(ack): Json<ContentAck>,
) -> StatusCode {
    let mut work = driver.state().work();
    if ack.success {
        info!("Setup completed by {}", ack.agent);
        work.set_setup_done();
    } else {
        let reason = ack.error.unwrap_or_else(|| "unknown error".to_string());
        work.fail_setup(format!("{}: {}", ack.agent, reason));
    }
    StatusCode::OK
}

async fn master_election_handler(State(driver): State<SharedDriver>) -> StatusCode {
    let election = driver.elect();
    tokio::spawn(async move {
        if let Err(e) = election.await {
            error!("Election failed: {}", e);
        }
    });
    StatusCode::ACCEPTED
}

async fn driver_updates_handler(State(driver): State<SharedDriver>) -> Json<DriverUpdate> {
    Json(driver.state().update())
}

async fn nr_drivers_handler(State(driver): State<SharedDriver>) -> Json<usize> {
    Json(driver.state().nr_drivers())
}

async fn heartbeat_handler(State(driver): State<SharedDriver>) -> Json<RunProgress> {
    Json(driver.state().work().progress())
}

async fn agent_failure_handler(
    State(driver): State<SharedDriver>,
    Query(params): Query<ForwardParams>,
    Json(failure): Json<AgentFailure>,
) -> StatusCode {
    driver.remove_agent(&failure.agent).await;
    forward_if(&driver, params, "/agentFailure", &failure).await;
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::client::ClusterClient;
    use crate::config::ClusterConfig;
    use crate::http::{HttpClient, RetryPolicy};
    use std::time::Duration;

    async fn spawn_driver(nr_drivers: usize) -> (SharedDriver, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cluster = ClusterConfig {
            nr_drivers,
            driver_url_template: format!("http://{addr}"),
            ..ClusterConfig::default()
        };
        let client = ClusterClient::new(
            HttpClient::with_timeout(2).unwrap(),
            RetryPolicy::new(1, Duration::ZERO),
        );
        let driver = Arc::new(Driver::new(0, cluster, client));
        let app = router(driver.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });
        (driver, format!("http://{addr}"))
    }

    fn client() -> ClusterClient {
        ClusterClient::new(
            HttpClient::with_timeout(2).unwrap(),
            RetryPolicy::new(2, Duration::from_millis(50)),
        )
    }

    #[tokio::test]
    async fn test_health_and_driver_count() {
        let (_driver, url) = spawn_driver(3).await;
        let http = HttpClient::with_timeout(2).unwrap();
        let response = http.get(&format!("{url}/health")).await.unwrap();
        assert_eq!(response.body, HEALTHY);
        assert_eq!(client().nr_drivers(&url).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_register_agent_shows_in_updates() {
        let (driver, url) = spawn_driver(1).await;
        client()
            .register_agent(&url, "http://agent-0:4001", false)
            .await
            .unwrap();
        client()
            .register_agent(&url, "http://agent-0:4001", false)
            .await
            .unwrap();

        let update = client().driver_updates(&url).await.unwrap();
        assert_eq!(update.agents, vec!["http://agent-0:4001"]);
        assert_eq!(update.id, 0);
        assert!(driver.state().has_agent("http://agent-0:4001"));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (driver, url) = spawn_driver(1).await;
        let mut config = Configuration::example();
        config.version = "0.1".to_string();

        let err = client().submit_config(&url, &config, false).await.unwrap_err();
        assert!(matches!(err, crate::cluster::ClusterError::Rejected { status: 400, .. }));
        assert!(driver.state().config().is_none());
    }

    #[tokio::test]
    async fn test_config_stored_on_candidate() {
        let (driver, url) = spawn_driver(1).await;
        client()
            .submit_config(&url, &Configuration::example(), false)
            .await
            .unwrap();
        assert_eq!(driver.state().config(), Some(Configuration::example()));
    }

    #[tokio::test]
    async fn test_phase_finished_clears_assignment() {
        let (driver, url) = spawn_driver(1).await;
        {
            let mut work = driver.state().work();
            work.begin_phase(0, "load");
            work.assign("http://agent-0:4001", crate::models::PhaseSpec::new("load"));
        }

        let report = PhaseFinished {
            agent: "http://agent-0:4001".to_string(),
            phase: "load".to_string(),
            counts: Default::default(),
        };
        client().phase_finished(&url, &report, false).await.unwrap();
        assert!(driver.state().work().phase_complete());

        let progress = client().heartbeat(&url).await.unwrap();
        assert!(progress.outstanding.is_empty());
        assert_eq!(progress.phase.as_deref(), Some("load"));
    }

    #[tokio::test]
    async fn test_failed_setup_ack() {
        let (driver, url) = spawn_driver(1).await;
        let ack = ContentAck {
            agent: "http://agent-0:4001".to_string(),
            success: false,
            error: Some("seed data rejected".to_string()),
        };
        client()
            .content_ack(&format!("{url}/contentAck"), &ack)
            .await
            .unwrap();
        let work = driver.state().work();
        assert!(!work.setup_done());
        assert!(work.setup_error().unwrap().contains("seed data rejected"));
    }
}
