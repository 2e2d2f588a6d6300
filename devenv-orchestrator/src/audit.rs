//! Append-only history of orchestration actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::db::{from_millis, to_millis};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failed,
    InProgress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub user_id: String,
    pub environment_id: Option<String>,
    pub action: String,
    pub status: AuditStatus,
    pub metadata: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An entry waiting to be appended.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub user_id: String,
    pub environment_id: Option<String>,
    pub action: String,
    pub status: AuditStatus,
    pub metadata: serde_json::Value,
    pub error_message: Option<String>,
}

impl NewAuditEntry {
    pub fn new(user_id: impl Into<String>, action: impl Into<String>, status: AuditStatus) -> Self {
        Self {
            user_id: user_id.into(),
            environment_id: None,
            action: action.into(),
            status,
            metadata: serde_json::json!({}),
            error_message: None,
        }
    }

    pub fn environment(mut self, environment_id: impl Into<String>) -> Self {
        self.environment_id = Some(environment_id.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Write-only: entries are never updated or deleted.
#[derive(Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        append_with(&self.pool, entry).await
    }

    /// Entries for one environment, oldest first.
    pub async fn list_for_environment(&self, environment_id: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT * FROM environment_audit_log WHERE environment_id = ? ORDER BY created_at, seq",
        )
        .bind(environment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    /// Entries for one user across all environments, oldest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT * FROM environment_audit_log WHERE user_id = ? ORDER BY created_at, seq",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }
}

/// Append through any executor so entries can join an open transaction.
pub(crate) async fn append_with<'e, E>(executor: E, entry: NewAuditEntry) -> Result<AuditEntry>
where
    E: SqliteExecutor<'e>,
{
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO environment_audit_log
            (id, user_id, environment_id, action, status, metadata, error_message, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&entry.user_id)
    .bind(&entry.environment_id)
    .bind(&entry.action)
    .bind(entry.status)
    .bind(entry.metadata.to_string())
    .bind(&entry.error_message)
    .bind(to_millis(now))
    .execute(executor)
    .await?;

    Ok(AuditEntry {
        id,
        user_id: entry.user_id,
        environment_id: entry.environment_id,
        action: entry.action,
        status: entry.status,
        metadata: entry.metadata,
        error_message: entry.error_message,
        created_at: from_millis(to_millis(now)),
    })
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    user_id: String,
    environment_id: Option<String>,
    action: String,
    status: AuditStatus,
    metadata: String,
    error_message: Option<String>,
    created_at: i64,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            environment_id: row.environment_id,
            action: row.action,
            status: row.status,
            metadata: serde_json::from_str(&row.metadata).unwrap_or(serde_json::Value::Null),
            error_message: row.error_message,
            created_at: from_millis(row.created_at),
        }
    }
}
