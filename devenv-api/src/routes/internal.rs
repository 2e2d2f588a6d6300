//! Callbacks for the provisioning worker and fleet administration.
//!
//! These routes carry no user identity and must only be reachable from the
//! private network.

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use devenv_orchestrator::{
    Environment, EnvironmentState, Host, HostStatus, Job, RegisterHostRequest, TransitionMetadata,
};
use serde::Deserialize;
use tracing::info;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/internal/v1/environments/{id}/transitions",
            post(transition_environment),
        )
        .route("/internal/v1/hosts", get(list_hosts).post(register_host))
        .route("/internal/v1/hosts/{id}/status", put(set_host_status))
        .route("/internal/v1/jobs/claim", post(claim_job))
        .route("/internal/v1/jobs/{id}/complete", post(complete_job))
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub state: EnvironmentState,
    #[serde(default)]
    pub metadata: TransitionMetadata,
}

async fn transition_environment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TransitionBody>,
) -> ApiResult<Json<Environment>> {
    let env = state
        .orchestrator
        .transition_state(&id, body.state, body.metadata)
        .await?;

    Ok(Json(env))
}

async fn list_hosts(State(state): State<AppState>) -> ApiResult<Json<Vec<Host>>> {
    Ok(Json(state.orchestrator.hosts().list_hosts().await?))
}

async fn register_host(
    State(state): State<AppState>,
    Json(req): Json<RegisterHostRequest>,
) -> ApiResult<(StatusCode, Json<Host>)> {
    let host = state.orchestrator.hosts().register_host(req).await?;

    Ok((StatusCode::CREATED, Json(host)))
}

#[derive(Debug, Deserialize)]
pub struct HostStatusBody {
    pub status: HostStatus,
}

async fn set_host_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<HostStatusBody>,
) -> ApiResult<Json<Host>> {
    let host = state
        .orchestrator
        .hosts()
        .set_host_status(&id, body.status)
        .await?;

    Ok(Json(host))
}

/// Hand the oldest pending job to a worker; 204 when the queue is empty.
async fn claim_job(State(state): State<AppState>) -> ApiResult<Response> {
    let job = state
        .jobs
        .claim_next()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(match job {
        Some(job) => {
            info!(job_id = %job.id, kind = %job.kind, "job claimed");
            Json(job).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteJobBody {
    #[serde(default)]
    pub error: Option<String>,
}

async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CompleteJobBody>,
) -> ApiResult<Json<Job>> {
    let job = state
        .jobs
        .complete(&id, body.error)
        .await
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    Ok(Json(job))
}
