//! Agent HTTP endpoints

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::warn;

use super::{Agent, AgentError};
use crate::cluster::{AgentStatus, SetupRequest, SubmitTask, HEALTHY};

type SharedAgent = Arc<Agent>;

pub fn router(agent: SharedAgent) -> Router {
    Router::new()
        .route("/submitTask", post(submit_task_handler))
        .route("/setup", post(setup_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(agent)
}

fn reject(e: AgentError) -> (StatusCode, String) {
    warn!("{}", e);
    let status = match e {
        AgentError::Busy(_) => StatusCode::CONFLICT,
        AgentError::Invalid(_) => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string())
}

async fn submit_task_handler(
    State(agent): State<SharedAgent>,
    Json(task): Json<SubmitTask>,
) -> Result<StatusCode, (StatusCode, String)> {
    agent.submit(task).map_err(reject)?;
    Ok(StatusCode::ACCEPTED)
}

async fn setup_handler(
    State(agent): State<SharedAgent>,
    Json(request): Json<SetupRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    agent.setup(request).map_err(reject)?;
    Ok(StatusCode::ACCEPTED)
}

async fn status_handler(State(agent): State<SharedAgent>) -> Json<AgentStatus> {
    Json(agent.status())
}

async fn health_handler() -> &'static str {
    HEALTHY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{AgentState, ClusterClient};
    use crate::config::GlobalArgs;
    use crate::http::{HttpClient, RetryPolicy};
    use crate::models::{PhaseSpec, TestSpec};
    use crate::registry::TestRegistry;
    use std::time::Duration;

    async fn spawn_agent() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let client = ClusterClient::new(
            HttpClient::with_timeout(1).unwrap(),
            RetryPolicy::new(1, Duration::ZERO),
        );
        let agent = Arc::new(Agent::new(
            url.clone(),
            "http://127.0.0.1:9",
            Arc::new(TestRegistry::with_builtins()),
            Vec::new(),
            client,
        ));
        tokio::spawn(async move { axum::serve(listener, router(agent)).await });
        url
    }

    fn client() -> ClusterClient {
        ClusterClient::new(
            HttpClient::with_timeout(2).unwrap(),
            RetryPolicy::new(1, Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn test_status_over_http() {
        let url = spawn_agent().await;
        let status = client().agent_status(&url).await.unwrap();
        assert_eq!(status.state, AgentState::Idle);
    }

    #[tokio::test]
    async fn test_second_task_conflicts() {
        let url = spawn_agent().await;
        let task = SubmitTask {
            globals: GlobalArgs::default(),
            phase: PhaseSpec::new("soak")
                .duration_secs(30)
                .test(TestSpec::new("Nap", "sleep").property("millis", 50)),
        };

        client().submit_task(&url, &task).await.unwrap();
        let err = client().submit_task(&url, &task).await.unwrap_err();
        assert!(matches!(
            err,
            crate::cluster::ClusterError::Rejected { status: 409, .. }
        ));

        let status = client().agent_status(&url).await.unwrap();
        assert_eq!(status.state, AgentState::Running);
        assert_eq!(status.phase.as_deref(), Some("soak"));
    }
}
