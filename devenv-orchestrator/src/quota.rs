use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use tracing::{debug, warn};

use crate::config::QuotaDefaults;
use crate::db::to_millis;
use crate::error::{OrchestratorError, Result};
use crate::resources::ResourceSpec;
use crate::state::EnvironmentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaDimension {
    Concurrency,
    Vcpus,
    Memory,
    Disk,
}

impl fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuotaDimension::Concurrency => "concurrency",
            QuotaDimension::Vcpus => "vcpus",
            QuotaDimension::Memory => "memory",
            QuotaDimension::Disk => "disk",
        };
        f.write_str(s)
    }
}

/// Per-user ceilings, with the live count of active environments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub user_id: String,
    pub max_concurrent_environments: i64,
    pub max_vcpus_per_environment: i64,
    pub max_memory_mb_per_environment: i64,
    pub max_disk_gb_per_environment: i64,
    pub current_environments: i64,
}

impl Quota {
    /// First dimension `resources` would violate, if any.
    pub fn violation(&self, resources: &ResourceSpec) -> Option<QuotaDimension> {
        if self.current_environments >= self.max_concurrent_environments {
            Some(QuotaDimension::Concurrency)
        } else if resources.vcpus > self.max_vcpus_per_environment {
            Some(QuotaDimension::Vcpus)
        } else if resources.memory_mb > self.max_memory_mb_per_environment {
            Some(QuotaDimension::Memory)
        } else if resources.disk_gb > self.max_disk_gb_per_environment {
            Some(QuotaDimension::Disk)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct QuotaEnforcer {
    pool: SqlitePool,
    defaults: QuotaDefaults,
}

impl QuotaEnforcer {
    pub fn new(pool: SqlitePool, defaults: QuotaDefaults) -> Self {
        Self { pool, defaults }
    }

    /// Validate a request against the user's ceilings, creating the quota row on first use.
    pub async fn check_quota(&self, user_id: &str, resources: &ResourceSpec) -> Result<Quota> {
        let quota = self.get_quota(user_id).await?;

        if let Some(dimension) = quota.violation(resources) {
            warn!(user_id, %dimension, "quota exceeded");
            return Err(OrchestratorError::QuotaExceeded { dimension });
        }

        debug!(
            user_id,
            active = quota.current_environments,
            max = quota.max_concurrent_environments,
            "quota check passed"
        );

        Ok(quota)
    }

    pub async fn get_quota(&self, user_id: &str) -> Result<Quota> {
        self.ensure_quota(user_id).await?;

        let row = sqlx::query_as::<_, QuotaRow>(&format!(
            "SELECT q.user_id,
                    q.max_concurrent_environments,
                    q.max_vcpus_per_environment,
                    q.max_memory_mb_per_environment,
                    q.max_disk_gb_per_environment,
                    (SELECT COUNT(*) FROM environments e
                      WHERE e.user_id = q.user_id AND e.state IN ({})) AS current_environments
             FROM user_quotas q WHERE q.user_id = ?",
            EnvironmentState::active_sql_list()
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// Replace a user's ceilings.
    pub async fn set_quota(&self, user_id: &str, limits: QuotaDefaults) -> Result<Quota> {
        let now = to_millis(Utc::now());

        sqlx::query(
            "INSERT INTO user_quotas
                (user_id, max_concurrent_environments, max_vcpus_per_environment,
                 max_memory_mb_per_environment, max_disk_gb_per_environment, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                max_concurrent_environments = excluded.max_concurrent_environments,
                max_vcpus_per_environment = excluded.max_vcpus_per_environment,
                max_memory_mb_per_environment = excluded.max_memory_mb_per_environment,
                max_disk_gb_per_environment = excluded.max_disk_gb_per_environment,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(limits.max_concurrent_environments)
        .bind(limits.max_vcpus_per_environment)
        .bind(limits.max_memory_mb_per_environment)
        .bind(limits.max_disk_gb_per_environment)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_quota(user_id).await
    }

    // Existing rows are left untouched.
    async fn ensure_quota(&self, user_id: &str) -> Result<()> {
        let now = to_millis(Utc::now());

        let inserted = sqlx::query(
            "INSERT INTO user_quotas
                (user_id, max_concurrent_environments, max_vcpus_per_environment,
                 max_memory_mb_per_environment, max_disk_gb_per_environment, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(self.defaults.max_concurrent_environments)
        .bind(self.defaults.max_vcpus_per_environment)
        .bind(self.defaults.max_memory_mb_per_environment)
        .bind(self.defaults.max_disk_gb_per_environment)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            debug!(user_id, "created default quota");
        }

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct QuotaRow {
    user_id: String,
    max_concurrent_environments: i64,
    max_vcpus_per_environment: i64,
    max_memory_mb_per_environment: i64,
    max_disk_gb_per_environment: i64,
    current_environments: i64,
}

impl From<QuotaRow> for Quota {
    fn from(row: QuotaRow) -> Self {
        Self {
            user_id: row.user_id,
            max_concurrent_environments: row.max_concurrent_environments,
            max_vcpus_per_environment: row.max_vcpus_per_environment,
            max_memory_mb_per_environment: row.max_memory_mb_per_environment,
            max_disk_gb_per_environment: row.max_disk_gb_per_environment,
            current_environments: row.current_environments,
        }
    }
}
