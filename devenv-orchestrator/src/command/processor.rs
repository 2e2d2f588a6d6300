use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::{parse_command, Command, ParseError};
use crate::environment::{CreateEnvironmentRequest, Environment, EnvironmentDetails};
use crate::error::OrchestratorError;
use crate::gateway::{NotificationKind, Notifier};
use crate::orchestrator::EnvironmentOrchestrator;
use crate::state::EnvironmentState;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Who issued a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub email: Option<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDetails {
    pub slug: String,
    pub ssh_command: Option<String>,
    pub vscode_url: Option<String>,
    pub ws_endpoint: Option<String>,
    pub access_token: String,
}

impl From<&Environment> for ConnectionDetails {
    fn from(env: &Environment) -> Self {
        let ip = env.network.ip_address.as_deref();

        Self {
            slug: env.slug.clone(),
            ssh_command: ip
                .zip(env.network.ssh_port)
                .map(|(ip, port)| format!("ssh -p {} dev@{}", port, ip)),
            vscode_url: ip.zip(env.network.vscode_port).map(|(ip, port)| {
                format!("http://{}:{}/?tkn={}", ip, port, env.access_token)
            }),
            ws_endpoint: env.network.ws_endpoint.clone(),
            access_token: env.access_token.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum CommandOutcome {
    Created(EnvironmentDetails),
    Destroyed { slug: String },
    Status(EnvironmentDetails),
    Listed(Vec<EnvironmentDetails>),
    ExecutionQueued { slug: String, job_id: String },
    Connection(ConnectionDetails),
}

impl CommandOutcome {
    fn notification_kind(&self) -> NotificationKind {
        match self {
            CommandOutcome::Created(_) => NotificationKind::EnvironmentCreated,
            CommandOutcome::Destroyed { .. } => NotificationKind::EnvironmentDestroyed,
            CommandOutcome::Status(_) => NotificationKind::EnvironmentStatus,
            CommandOutcome::Listed(_) => NotificationKind::EnvironmentList,
            CommandOutcome::ExecutionQueued { .. } => NotificationKind::ExecutionQueued,
            CommandOutcome::Connection(_) => NotificationKind::ConnectionDetails,
        }
    }
}

/// Runs commands against the orchestrator and reports every outcome to the user.
#[derive(Clone)]
pub struct CommandProcessor {
    orchestrator: EnvironmentOrchestrator,
    notifier: Arc<dyn Notifier>,
}

impl CommandProcessor {
    pub fn new(orchestrator: EnvironmentOrchestrator, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            orchestrator,
            notifier,
        }
    }

    pub async fn dispatch(
        &self,
        command: Command,
        user: &UserContext,
    ) -> Result<CommandOutcome, OrchestratorError> {
        let name = command.name();
        let target = command.target().map(str::to_string);
        let result = self.execute(command, user).await;

        match &result {
            Ok(outcome) => {
                info!(user_id = %user.user_id, command = name, "command succeeded");
                let payload = serde_json::to_value(outcome).unwrap_or_else(|e| {
                    warn!(
                        user_id = %user.user_id,
                        command = name,
                        error = %e,
                        "failed to serialize outcome"
                    );
                    json!({})
                });
                self.send(user, outcome.notification_kind(), payload).await;
            }
            Err(err) => {
                warn!(user_id = %user.user_id, command = name, error = %err, "command failed");
                self.send(user, NotificationKind::CommandFailed, failure_payload(name, target, err))
                    .await;
            }
        }

        result
    }

    /// Parse a subject/body pair and dispatch it; parse errors are reported too.
    pub async fn dispatch_text(
        &self,
        subject: &str,
        body: &str,
        user: &UserContext,
    ) -> Result<CommandOutcome, CommandError> {
        let command = match parse_command(subject, body) {
            Ok(command) => command,
            Err(err) => {
                warn!(user_id = %user.user_id, subject, error = %err, "unparseable command");
                self.send(
                    user,
                    NotificationKind::CommandFailed,
                    json!({ "command": null, "subject": subject, "error": err.to_string() }),
                )
                .await;
                return Err(err.into());
            }
        };

        Ok(self.dispatch(command, user).await?)
    }

    async fn execute(
        &self,
        command: Command,
        user: &UserContext,
    ) -> Result<CommandOutcome, OrchestratorError> {
        match command {
            Command::Create {
                resources,
                duration_hours,
                repository_url,
                init_script,
            } => {
                let details = self
                    .orchestrator
                    .create_environment(CreateEnvironmentRequest {
                        user_id: user.user_id.clone(),
                        resources,
                        duration_hours,
                        repository_url,
                        init_script,
                        env_vars: Default::default(),
                    })
                    .await?;
                Ok(CommandOutcome::Created(details))
            }
            Command::Destroy { slug } => {
                let env = self.owned(user, &slug).await?;
                self.orchestrator
                    .destroy_environment(&env.id, &user.user_id)
                    .await?;
                Ok(CommandOutcome::Destroyed { slug })
            }
            Command::Status { slug } => {
                let env = self.owned(user, &slug).await?;
                Ok(CommandOutcome::Status(env.into()))
            }
            Command::List => {
                let envs = self.orchestrator.list_environments(&user.user_id).await?;
                Ok(CommandOutcome::Listed(envs))
            }
            Command::Execute { slug, code } => {
                let env = self.owned(user, &slug).await?;
                let job_id = self.orchestrator.enqueue_execution(&env, &code).await?;
                self.orchestrator.touch_activity(&env.id).await?;
                Ok(CommandOutcome::ExecutionQueued { slug, job_id })
            }
            Command::Connect { slug } => {
                let env = self.owned(user, &slug).await?;
                if env.state != EnvironmentState::Running {
                    return Err(OrchestratorError::InvalidInput(format!(
                        "environment {} is {}, not running",
                        env.slug, env.state
                    )));
                }
                self.orchestrator.touch_activity(&env.id).await?;
                Ok(CommandOutcome::Connection(ConnectionDetails::from(&env)))
            }
        }
    }

    async fn owned(&self, user: &UserContext, slug: &str) -> Result<Environment, OrchestratorError> {
        self.orchestrator
            .get_environment_by_slug(&user.user_id, slug)
            .await
    }

    async fn send(&self, user: &UserContext, kind: NotificationKind, payload: serde_json::Value) {
        if let Err(err) = self.notifier.notify(&user.user_id, kind, payload).await {
            warn!(user_id = %user.user_id, ?kind, error = %err, "notification failed");
        }
    }
}

fn failure_payload(
    command: &str,
    target: Option<String>,
    err: &OrchestratorError,
) -> serde_json::Value {
    let mut payload = json!({
        "command": command,
        "target": target,
        "error": err.to_string(),
    });

    if let OrchestratorError::QuotaExceeded { dimension } = err {
        payload["dimension"] = json!(dimension);
    }

    payload
}
