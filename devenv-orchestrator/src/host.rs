//! Hypervisor hosts and first-fit capacity reservation.
//!
//! Hosts are scanned oldest first (`created_at`, then insertion order).
//! Reservation and release are single conditional `UPDATE` statements, so the
//! headroom check and the counter increment can never interleave with another
//! writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{from_millis, to_millis};
use crate::error::{OrchestratorError, Result};
use crate::resources::ResourceSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum HostStatus {
    Provisioning,
    Ready,
    Full,
    Maintenance,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    pub address: String,
    pub status: HostStatus,
    pub max_vms: i64,
    pub max_vcpus: i64,
    pub max_memory_mb: i64,
    pub current_vms: i64,
    pub current_vcpus: i64,
    pub current_memory_mb: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Host {
    pub fn free_vm_slots(&self) -> i64 {
        self.max_vms - self.current_vms
    }

    pub fn free_vcpus(&self) -> i64 {
        self.max_vcpus - self.current_vcpus
    }

    pub fn free_memory_mb(&self) -> i64 {
        self.max_memory_mb - self.current_memory_mb
    }

    /// Whether `resources` fit in the remaining headroom on every dimension.
    pub fn fits(&self, resources: &ResourceSpec) -> bool {
        self.free_vm_slots() > 0
            && self.free_vcpus() >= resources.vcpus
            && self.free_memory_mb() >= resources.memory_mb
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterHostRequest {
    pub name: String,
    pub address: String,
    pub max_vms: i64,
    pub max_vcpus: i64,
    pub max_memory_mb: i64,
    pub status: Option<HostStatus>,
}

#[derive(Clone)]
pub struct HostAllocator {
    pool: SqlitePool,
}

impl HostAllocator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add a hypervisor to the fleet with empty usage counters.
    pub async fn register_host(&self, req: RegisterHostRequest) -> Result<Host> {
        if req.max_vms <= 0 || req.max_vcpus <= 0 || req.max_memory_mb <= 0 {
            return Err(OrchestratorError::InvalidInput(format!(
                "host {} capacity ceilings must be positive",
                req.name
            )));
        }

        let id = Uuid::new_v4().to_string();
        let now = to_millis(Utc::now());

        sqlx::query(
            "INSERT INTO hosts (id, name, address, status, max_vms, max_vcpus, max_memory_mb, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&req.name)
        .bind(&req.address)
        .bind(req.status.unwrap_or(HostStatus::Ready))
        .bind(req.max_vms)
        .bind(req.max_vcpus)
        .bind(req.max_memory_mb)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(host_id = %id, name = %req.name, "host registered");

        self.get_host(&id).await
    }

    pub async fn get_host(&self, id: &str) -> Result<Host> {
        let row = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("host {}", id)))?;

        Ok(row.into())
    }

    /// All hosts in allocation order.
    pub async fn list_hosts(&self) -> Result<Vec<Host>> {
        let rows = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts ORDER BY created_at, rowid")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Host::from).collect())
    }

    pub async fn set_host_status(&self, id: &str, status: HostStatus) -> Result<Host> {
        let row = sqlx::query_as::<_, HostRow>(
            "UPDATE hosts SET status = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(status)
        .bind(to_millis(Utc::now()))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("host {}", id)))?;

        info!(host_id = %id, ?status, "host status changed");

        Ok(row.into())
    }

    /// Reserve capacity on the first ready host that fits.
    pub async fn find_and_reserve_host(&self, resources: &ResourceSpec) -> Result<Host> {
        reserve_with(&self.pool, resources).await
    }

    /// Give capacity back, clamping every counter at zero.
    pub async fn release_host(&self, host_id: &str, resources: &ResourceSpec) -> Result<Host> {
        release_with(&self.pool, host_id, resources).await
    }
}

pub(crate) async fn reserve_with<'e, E>(executor: E, resources: &ResourceSpec) -> Result<Host>
where
    E: SqliteExecutor<'e>,
{
    // The outer predicate repeats the headroom check so the row is re-validated
    // at write time even if the subquery plan changes.
    let row = sqlx::query_as::<_, HostRow>(
        "UPDATE hosts
         SET current_vms = current_vms + 1,
             current_vcpus = current_vcpus + ?,
             current_memory_mb = current_memory_mb + ?,
             status = CASE WHEN current_vms + 1 >= max_vms THEN 'full' ELSE status END,
             updated_at = ?
         WHERE id = (
                SELECT id FROM hosts
                WHERE status = 'ready'
                  AND max_vms - current_vms > 0
                  AND max_vcpus - current_vcpus >= ?
                  AND max_memory_mb - current_memory_mb >= ?
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
             )
           AND status = 'ready'
           AND max_vms - current_vms > 0
           AND max_vcpus - current_vcpus >= ?
           AND max_memory_mb - current_memory_mb >= ?
         RETURNING *",
    )
    .bind(resources.vcpus)
    .bind(resources.memory_mb)
    .bind(to_millis(Utc::now()))
    .bind(resources.vcpus)
    .bind(resources.memory_mb)
    .bind(resources.vcpus)
    .bind(resources.memory_mb)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => {
            let host = Host::from(row);
            debug!(
                host_id = %host.id,
                vcpus = resources.vcpus,
                memory_mb = resources.memory_mb,
                free_slots = host.free_vm_slots(),
                "capacity reserved"
            );
            Ok(host)
        }
        None => {
            warn!(
                vcpus = resources.vcpus,
                memory_mb = resources.memory_mb,
                "no host has capacity"
            );
            Err(OrchestratorError::NoCapacity)
        }
    }
}

pub(crate) async fn release_with<'e, E>(
    executor: E,
    host_id: &str,
    resources: &ResourceSpec,
) -> Result<Host>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, HostRow>(
        "UPDATE hosts
         SET current_vms = MAX(current_vms - 1, 0),
             current_vcpus = MAX(current_vcpus - ?, 0),
             current_memory_mb = MAX(current_memory_mb - ?, 0),
             status = CASE WHEN status = 'full' THEN 'ready' ELSE status END,
             updated_at = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(resources.vcpus)
    .bind(resources.memory_mb)
    .bind(to_millis(Utc::now()))
    .bind(host_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| OrchestratorError::NotFound(format!("host {}", host_id)))?;

    let host = Host::from(row);
    debug!(
        host_id = %host.id,
        vcpus = resources.vcpus,
        memory_mb = resources.memory_mb,
        "capacity released"
    );

    Ok(host)
}

#[derive(sqlx::FromRow)]
struct HostRow {
    id: String,
    name: String,
    address: String,
    status: HostStatus,
    max_vms: i64,
    max_vcpus: i64,
    max_memory_mb: i64,
    current_vms: i64,
    current_vcpus: i64,
    current_memory_mb: i64,
    created_at: i64,
    updated_at: i64,
}

impl From<HostRow> for Host {
    fn from(row: HostRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            address: row.address,
            status: row.status,
            max_vms: row.max_vms,
            max_vcpus: row.max_vcpus,
            max_memory_mb: row.max_memory_mb,
            current_vms: row.current_vms,
            current_vcpus: row.current_vcpus,
            current_memory_mb: row.current_memory_mb,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}
