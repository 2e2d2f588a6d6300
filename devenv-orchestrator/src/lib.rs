//! Environment orchestration business logic
//!
//! Quota enforcement, first-fit host allocation, the environment lifecycle
//! state machine and its audit trail. Consumed by the devenv-api service but
//! usable from workers or other entry points.

pub mod audit;
pub mod command;
pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod gateway;
pub mod host;
mod locks;
pub mod orchestrator;
pub mod quota;
pub mod resources;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use audit::{AuditEntry, AuditLog, AuditStatus, NewAuditEntry};
pub use command::{
    parse_command, Command, CommandError, CommandOutcome, CommandProcessor, ConnectionDetails,
    ParseError, UserContext,
};
pub use config::{OrchestratorConfig, QuotaDefaults};
pub use environment::{
    CreateEnvironmentRequest, Environment, EnvironmentDetails, NetworkInfo, TransitionMetadata,
};
pub use error::{OrchestratorError, Result};
pub use gateway::{
    GatewayError, Job, JobKind, JobQueue, JobStatus, NotificationKind, Notifier, SqliteJobQueue,
    TracingNotifier,
};
pub use host::{Host, HostAllocator, HostStatus, RegisterHostRequest};
pub use orchestrator::EnvironmentOrchestrator;
pub use quota::{Quota, QuotaDimension, QuotaEnforcer};
pub use resources::{ResourceRequest, ResourceSpec};
pub use state::{EnvironmentState, SideEffect};
