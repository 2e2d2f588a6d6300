use crate::{
    auth::AuthenticatedUser,
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use devenv_orchestrator::{
    AuditEntry, CreateEnvironmentRequest, Environment, EnvironmentDetails, ResourceRequest,
};
use serde::Deserialize;
use std::collections::HashMap;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/environments",
            get(list_environments).post(create_environment),
        )
        .route(
            "/api/v1/environments/{id}",
            get(get_environment).delete(destroy_environment),
        )
        .route("/api/v1/environments/{id}/start", post(start_environment))
        .route("/api/v1/environments/{id}/stop", post(stop_environment))
        .route("/api/v1/environments/{id}/audit", get(environment_audit))
}

/// Create body; the owner always comes from the authenticated user.
#[derive(Debug, Default, Deserialize)]
pub struct CreateEnvironmentBody {
    #[serde(default)]
    pub vcpus: Option<i64>,
    #[serde(default)]
    pub memory_mb: Option<i64>,
    #[serde(default)]
    pub disk_gb: Option<i64>,
    pub duration_hours: Option<i64>,
    pub repository_url: Option<String>,
    pub init_script: Option<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

async fn create_environment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<CreateEnvironmentBody>,
) -> ApiResult<(StatusCode, Json<EnvironmentDetails>)> {
    let req = CreateEnvironmentRequest {
        user_id: user.username,
        resources: ResourceRequest {
            vcpus: body.vcpus,
            memory_mb: body.memory_mb,
            disk_gb: body.disk_gb,
        },
        duration_hours: body.duration_hours,
        repository_url: body.repository_url,
        init_script: body.init_script,
        env_vars: body.env_vars,
    };

    let details = state.orchestrator.create_environment(req).await?;

    Ok((StatusCode::CREATED, Json(details)))
}

async fn list_environments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Vec<EnvironmentDetails>>> {
    let envs = state.orchestrator.list_environments(&user.username).await?;

    Ok(Json(envs))
}

async fn get_environment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<EnvironmentDetails>> {
    let env = owned(&state, &user, &id).await?;

    Ok(Json(env.into()))
}

async fn destroy_environment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    state
        .orchestrator
        .destroy_environment(&id, &user.username)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "Environment is being destroyed" })),
    ))
}

async fn start_environment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<EnvironmentDetails>> {
    let env = state
        .orchestrator
        .start_environment(&id, &user.username)
        .await?;
    Ok(Json(env.into()))
}

async fn stop_environment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<EnvironmentDetails>> {
    let env = state
        .orchestrator
        .stop_environment(&id, &user.username)
        .await?;
    Ok(Json(env.into()))
}

async fn environment_audit(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    owned(&state, &user, &id).await?;
    let entries = state.orchestrator.audit_for_environment(&id).await?;

    Ok(Json(entries))
}

// Someone else's environment is reported exactly like a missing one.
async fn owned(state: &AppState, user: &AuthenticatedUser, id: &str) -> ApiResult<Environment> {
    let env = state.orchestrator.load_environment(id).await?;

    if env.user_id != user.username {
        return Err(ApiError::NotFound(format!("not found: environment {}", id)));
    }

    Ok(env)
}
