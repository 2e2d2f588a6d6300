use crate::{auth::AuthenticatedUser, error::ApiResult, state::AppState};
use axum::{extract::State, routing::post, Extension, Json, Router};
use devenv_orchestrator::CommandOutcome;
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/commands", post(run_command))
}

/// A free-text command, shaped like a message: the subject carries the verb.
#[derive(Debug, Deserialize)]
pub struct CommandBody {
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

async fn run_command(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CommandBody>,
) -> ApiResult<Json<CommandOutcome>> {
    let outcome = state
        .commands
        .dispatch_text(&req.subject, &req.body, &user.context())
        .await?;

    Ok(Json(outcome))
}
