use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use devenv_orchestrator::{CommandError, OrchestratorError, QuotaDimension};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(QuotaDimension),

    #[error("{0}")]
    Conflict(String),

    #[error("no capacity available, try again later")]
    Unavailable,

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::QuotaExceeded(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({ "error": self.to_string() });
        if let ApiError::QuotaExceeded(dimension) = &self {
            body["dimension"] = json!(dimension);
        }

        (status, Json(body)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(what) => ApiError::NotFound(format!("not found: {}", what)),
            OrchestratorError::InvalidInput(msg) => ApiError::BadRequest(msg),
            OrchestratorError::QuotaExceeded { dimension } => ApiError::QuotaExceeded(dimension),
            OrchestratorError::NoCapacity => ApiError::Unavailable,
            err @ OrchestratorError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            err => {
                error!(error = %err, "request failed");
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Parse(err) => ApiError::BadRequest(err.to_string()),
            CommandError::Orchestrator(err) => err.into(),
        }
    }
}
