use crate::quota::QuotaDimension;
use crate::state::EnvironmentState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Quota exceeded: {dimension}")]
    QuotaExceeded { dimension: QuotaDimension },

    #[error("No capacity: all hosts are full")]
    NoCapacity,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: EnvironmentState,
        to: EnvironmentState,
    },

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::gateway::GatewayError> for OrchestratorError {
    fn from(err: crate::gateway::GatewayError) -> Self {
        OrchestratorError::ExternalService(err.to_string())
    }
}

impl OrchestratorError {
    /// Deterministic errors the caller caused; retrying the same request won't help.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::QuotaExceeded { .. }
                | OrchestratorError::NoCapacity
                | OrchestratorError::NotFound(_)
                | OrchestratorError::InvalidTransition { .. }
                | OrchestratorError::InvalidInput(_)
        )
    }
}
