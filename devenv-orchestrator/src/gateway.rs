//! Collaborators the orchestrator calls out to.
//!
//! The job queue carries provisioning work to an external worker, which drives
//! the hypervisor agent and reports back through `transition_state`. The
//! notifier reports command outcomes to users.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::db::{from_millis, to_millis};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("job queue unavailable: {0}")]
    Queue(String),

    #[error("notification delivery failed: {0}")]
    Notification(String),
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Queue(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobKind {
    Provision,
    Start,
    Stop,
    Destroy,
    Execute,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobKind::Provision => "provision",
            JobKind::Start => "start",
            JobKind::Stop => "stop",
            JobKind::Destroy => "destroy",
            JobKind::Execute => "execute",
        };
        f.write_str(s)
    }
}

/// Fire-and-forget hand-off of work for an environment.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        kind: JobKind,
        environment_id: &str,
        payload: serde_json::Value,
    ) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    EnvironmentCreated,
    EnvironmentDestroyed,
    EnvironmentStatus,
    EnvironmentList,
    ExecutionQueued,
    ConnectionDetails,
    CommandFailed,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Result<(), GatewayError>;
}

/// Logs notifications as structured events; delivery transports hook in elsewhere.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Result<(), GatewayError> {
        info!(user_id, ?kind, %payload, "notification");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub environment_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Job queue persisted in the `environment_jobs` table.
#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Claim the oldest pending job, if any.
    pub async fn claim_next(&self) -> Result<Option<Job>, GatewayError> {
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE environment_jobs SET status = ?, claimed_at = ?
             WHERE seq = (SELECT seq FROM environment_jobs WHERE status = ? ORDER BY seq LIMIT 1)
               AND status = ?
             RETURNING *",
        )
        .bind(JobStatus::Claimed)
        .bind(to_millis(Utc::now()))
        .bind(JobStatus::Pending)
        .bind(JobStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Job::from))
    }

    /// Record the outcome of a claimed job.
    pub async fn complete(&self, job_id: &str, error: Option<String>) -> Result<Job, GatewayError> {
        let status = if error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE environment_jobs SET status = ?, error = ?, completed_at = ?
             WHERE id = ? AND status = ?
             RETURNING *",
        )
        .bind(status)
        .bind(error)
        .bind(to_millis(Utc::now()))
        .bind(job_id)
        .bind(JobStatus::Claimed)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| GatewayError::Queue(format!("no claimed job {}", job_id)))?;

        Ok(row.into())
    }

    pub async fn jobs_for_environment(&self, environment_id: &str) -> Result<Vec<Job>, GatewayError> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM environment_jobs WHERE environment_id = ? ORDER BY seq",
        )
        .bind(environment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Job::from).collect())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(
        &self,
        kind: JobKind,
        environment_id: &str,
        payload: serde_json::Value,
    ) -> Result<String, GatewayError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO environment_jobs (id, environment_id, kind, status, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(environment_id)
        .bind(kind)
        .bind(JobStatus::Pending)
        .bind(payload.to_string())
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        info!(job_id = %id, %kind, environment_id, "job enqueued");

        Ok(id)
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    environment_id: String,
    kind: JobKind,
    status: JobStatus,
    payload: String,
    error: Option<String>,
    created_at: i64,
    claimed_at: Option<i64>,
    completed_at: Option<i64>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            environment_id: row.environment_id,
            kind: row.kind,
            status: row.status,
            payload: serde_json::from_str(&row.payload).unwrap_or(serde_json::Value::Null),
            error: row.error,
            created_at: from_millis(row.created_at),
            claimed_at: row.claimed_at.map(from_millis),
            completed_at: row.completed_at.map(from_millis),
        }
    }
}
