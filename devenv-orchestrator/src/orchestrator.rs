use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::audit::{append_with, AuditEntry, AuditLog, AuditStatus, NewAuditEntry};
use crate::config::OrchestratorConfig;
use crate::db::to_millis;
use crate::environment::{
    generate_access_token, generate_slug, CreateEnvironmentRequest, Environment,
    EnvironmentDetails, EnvironmentRow, TransitionMetadata,
};
use crate::error::{OrchestratorError, Result};
use crate::gateway::{JobKind, JobQueue};
use crate::host::{release_with, reserve_with, HostAllocator};
use crate::locks::KeyedLocks;
use crate::quota::QuotaEnforcer;
use crate::resources::ResourceSpec;
use crate::state::{EnvironmentState, SideEffect};

const SLUG_ATTEMPTS: usize = 8;

/// Owns environment records and drives them through the lifecycle.
///
/// Creation serialises per user so the concurrency quota cannot be overrun,
/// and transitions serialise per environment. Both locks are in-process; the
/// compare-and-swap on `state` keeps separate processes from interleaving.
#[derive(Clone)]
pub struct EnvironmentOrchestrator {
    pool: SqlitePool,
    config: OrchestratorConfig,
    quotas: QuotaEnforcer,
    hosts: HostAllocator,
    audit: AuditLog,
    jobs: Arc<dyn JobQueue>,
    user_locks: KeyedLocks,
    environment_locks: KeyedLocks,
}

impl EnvironmentOrchestrator {
    pub fn new(pool: SqlitePool, config: OrchestratorConfig, jobs: Arc<dyn JobQueue>) -> Self {
        Self {
            quotas: QuotaEnforcer::new(pool.clone(), config.quota),
            hosts: HostAllocator::new(pool.clone()),
            audit: AuditLog::new(pool.clone()),
            pool,
            config,
            jobs,
            user_locks: KeyedLocks::default(),
            environment_locks: KeyedLocks::default(),
        }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn quotas(&self) -> &QuotaEnforcer {
        &self.quotas
    }

    pub fn hosts(&self) -> &HostAllocator {
        &self.hosts
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Check quota, reserve a host, record the environment and start provisioning.
    ///
    /// Returns once the row exists and the provision job is queued; it never
    /// waits on the hypervisor.
    #[instrument(skip(self, req), fields(user_id = %req.user_id))]
    pub async fn create_environment(
        &self,
        req: CreateEnvironmentRequest,
    ) -> Result<EnvironmentDetails> {
        let now = Utc::now();
        let duration_hours = req
            .duration_hours
            .unwrap_or(self.config.default_duration_hours);

        if duration_hours <= 0 || duration_hours > self.config.max_duration_hours {
            return Err(OrchestratorError::InvalidInput(format!(
                "duration must be between 1 and {} hours, got {}",
                self.config.max_duration_hours, duration_hours
            )));
        }

        let resources = req.resources.resolve(&self.config)?;
        let expires_at = now + Duration::hours(duration_hours);

        let user_guard = self.user_locks.lock(&req.user_id).await;

        if let Err(err) = self.quotas.check_quota(&req.user_id, &resources).await {
            self.record_failed_create(&req.user_id, &resources, &err).await;
            return Err(err);
        }

        let mut tx = self.pool.begin().await?;

        // The reservation must be the first statement so concurrent creators
        // queue on the write lock.
        let host = match reserve_with(&mut *tx, &resources).await {
            Ok(host) => host,
            Err(err) => {
                drop(tx);
                self.record_failed_create(&req.user_id, &resources, &err).await;
                return Err(err);
            }
        };

        let slug = unique_slug(&mut tx).await?;
        let id = Uuid::new_v4().to_string();
        let env_vars = serde_json::to_string(&req.env_vars)?;

        sqlx::query(
            r#"
            INSERT INTO environments (
                id, user_id, slug, state, host_id, capacity_reserved,
                vcpus, memory_mb, disk_gb, access_token,
                repository_url, init_script, env_vars,
                created_at, updated_at, expires_at
            )
            VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.user_id)
        .bind(&slug)
        .bind(EnvironmentState::Requested)
        .bind(&host.id)
        .bind(resources.vcpus)
        .bind(resources.memory_mb)
        .bind(resources.disk_gb)
        .bind(generate_access_token())
        .bind(&req.repository_url)
        .bind(&req.init_script)
        .bind(env_vars)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .bind(to_millis(expires_at))
        .execute(&mut *tx)
        .await?;

        append_with(
            &mut *tx,
            NewAuditEntry::new(&req.user_id, "create", AuditStatus::Success)
                .environment(&id)
                .metadata(json!({
                    "slug": slug,
                    "hostId": host.id,
                    "resources": resources,
                    "durationHours": duration_hours,
                    "expiresAt": expires_at.to_rfc3339(),
                    "repositoryUrl": req.repository_url,
                })),
        )
        .await?;

        tx.commit().await?;
        drop(user_guard);

        info!(
            environment_id = %id,
            %slug,
            host_id = %host.id,
            vcpus = resources.vcpus,
            memory_mb = resources.memory_mb,
            "environment created"
        );

        let env = self
            .transition_state(
                &id,
                EnvironmentState::Provisioning,
                TransitionMetadata::message("Queued for provisioning"),
            )
            .await?;

        Ok(env.into())
    }

    /// Move an environment to `new_state`, audit it and run the state's side effect.
    #[instrument(skip(self, metadata))]
    pub async fn transition_state(
        &self,
        environment_id: &str,
        new_state: EnvironmentState,
        metadata: TransitionMetadata,
    ) -> Result<Environment> {
        let _env_guard = self.environment_locks.lock(environment_id).await;

        let env = self.load_environment(environment_id).await?;
        let from = env.state;

        let mut audit_metadata = metadata.details.clone();
        audit_metadata.insert("previousState".to_string(), json!(from));
        audit_metadata.insert("newState".to_string(), json!(new_state));
        if let Some(message) = &metadata.message {
            audit_metadata.insert("message".to_string(), json!(message));
        }
        let audit_metadata = serde_json::Value::Object(audit_metadata);

        if !from.can_transition_to(new_state) {
            return Err(self
                .reject_transition(&env, from, new_state, audit_metadata)
                .await);
        }

        let network = metadata.network.unwrap_or_default();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE environments
             SET state = ?, state_message = ?,
                 ip_address = COALESCE(?, ip_address),
                 ssh_port = COALESCE(?, ssh_port),
                 vscode_port = COALESCE(?, vscode_port),
                 ws_endpoint = COALESCE(?, ws_endpoint),
                 updated_at = ?
             WHERE id = ? AND state = ?",
        )
        .bind(new_state)
        .bind(&metadata.message)
        .bind(&network.ip_address)
        .bind(network.ssh_port)
        .bind(network.vscode_port)
        .bind(&network.ws_endpoint)
        .bind(to_millis(Utc::now()))
        .bind(environment_id)
        .bind(from)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            // Another process moved the row first.
            drop(tx);
            let current = self.load_environment(environment_id).await?;
            return Err(self
                .reject_transition(&current, current.state, new_state, audit_metadata)
                .await);
        }

        append_with(
            &mut *tx,
            NewAuditEntry::new(&env.user_id, "transition", AuditStatus::Success)
                .environment(environment_id)
                .metadata(audit_metadata),
        )
        .await?;

        tx.commit().await?;

        info!(environment_id, slug = %env.slug, %from, to = %new_state, "state transition");

        let env = self.load_environment(environment_id).await?;

        if let Err(err) = self.run_side_effect(&env, new_state.side_effect()).await {
            warn!(environment_id, state = %new_state, error = %err, "side effect failed");
            self.audit
                .append(
                    NewAuditEntry::new(&env.user_id, "side_effect", AuditStatus::Failed)
                        .environment(environment_id)
                        .metadata(json!({ "state": new_state }))
                        .error(err.to_string()),
                )
                .await?;
            return Err(err);
        }

        self.load_environment(environment_id).await
    }

    /// Environment details, or `None` when the id is unknown.
    pub async fn get_environment(&self, environment_id: &str) -> Result<Option<EnvironmentDetails>> {
        let row = sqlx::query_as::<_, EnvironmentRow>("SELECT * FROM environments WHERE id = ?")
            .bind(environment_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Environment::from(row).into()))
    }

    /// Full environment record.
    pub async fn load_environment(&self, environment_id: &str) -> Result<Environment> {
        let row = sqlx::query_as::<_, EnvironmentRow>("SELECT * FROM environments WHERE id = ?")
            .bind(environment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("environment {}", environment_id)))?;

        Ok(row.into())
    }

    /// Look up an environment by slug, visible only to its owner.
    pub async fn get_environment_by_slug(&self, user_id: &str, slug: &str) -> Result<Environment> {
        let row = sqlx::query_as::<_, EnvironmentRow>(
            "SELECT * FROM environments WHERE slug = ? AND user_id = ?",
        )
        .bind(slug)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("environment {}", slug)))?;

        Ok(row.into())
    }

    /// The user's environments that have not been destroyed, newest first.
    pub async fn list_environments(&self, user_id: &str) -> Result<Vec<EnvironmentDetails>> {
        let rows = sqlx::query_as::<_, EnvironmentRow>(
            "SELECT * FROM environments WHERE user_id = ? AND state != ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .bind(EnvironmentState::Destroyed)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Environment::from(row).into())
            .collect())
    }

    /// Start tearing down an environment on behalf of its owner.
    #[instrument(skip(self))]
    pub async fn destroy_environment(&self, environment_id: &str, user_id: &str) -> Result<()> {
        self.owned_environment(environment_id, user_id).await?;

        self.transition_state(
            environment_id,
            EnvironmentState::Destroying,
            TransitionMetadata::message(format!("Destroy requested by {}", user_id)),
        )
        .await?;

        Ok(())
    }

    /// Restart a stopped environment.
    pub async fn start_environment(&self, environment_id: &str, user_id: &str) -> Result<Environment> {
        self.owned_environment(environment_id, user_id).await?;

        self.transition_state(
            environment_id,
            EnvironmentState::Starting,
            TransitionMetadata::message("Start requested"),
        )
        .await
    }

    pub async fn stop_environment(&self, environment_id: &str, user_id: &str) -> Result<Environment> {
        self.owned_environment(environment_id, user_id).await?;

        self.transition_state(
            environment_id,
            EnvironmentState::Stopping,
            TransitionMetadata::message("Stop requested"),
        )
        .await
    }

    /// Environments past `expires_at` that are not already destroying or destroyed.
    /// Errored environments are included; they can still hold host capacity.
    pub async fn get_expired_environments(&self, now: DateTime<Utc>) -> Result<Vec<Environment>> {
        let rows = sqlx::query_as::<_, EnvironmentRow>(
            "SELECT * FROM environments
             WHERE expires_at <= ? AND state NOT IN (?, ?)
             ORDER BY expires_at",
        )
        .bind(to_millis(now))
        .bind(EnvironmentState::Destroying)
        .bind(EnvironmentState::Destroyed)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Environment::from).collect())
    }

    pub async fn touch_activity(&self, environment_id: &str) -> Result<()> {
        let updated = sqlx::query("UPDATE environments SET last_activity_at = ? WHERE id = ?")
            .bind(to_millis(Utc::now()))
            .bind(environment_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(OrchestratorError::NotFound(format!(
                "environment {}",
                environment_id
            )));
        }

        Ok(())
    }

    pub async fn audit_for_environment(&self, environment_id: &str) -> Result<Vec<AuditEntry>> {
        self.audit.list_for_environment(environment_id).await
    }

    pub async fn audit_for_user(&self, user_id: &str) -> Result<Vec<AuditEntry>> {
        self.audit.list_for_user(user_id).await
    }

    async fn owned_environment(&self, environment_id: &str, user_id: &str) -> Result<Environment> {
        let env = self.load_environment(environment_id).await?;

        // Someone else's environment looks exactly like a missing one.
        if env.user_id != user_id {
            return Err(OrchestratorError::NotFound(format!(
                "environment {}",
                environment_id
            )));
        }

        Ok(env)
    }

    async fn reject_transition(
        &self,
        env: &Environment,
        from: EnvironmentState,
        to: EnvironmentState,
        metadata: serde_json::Value,
    ) -> OrchestratorError {
        let err = OrchestratorError::InvalidTransition { from, to };
        warn!(environment_id = %env.id, %from, %to, "rejected state transition");

        if let Err(audit_err) = self
            .audit
            .append(
                NewAuditEntry::new(&env.user_id, "transition", AuditStatus::Failed)
                    .environment(&env.id)
                    .metadata(metadata)
                    .error(err.to_string()),
            )
            .await
        {
            return audit_err;
        }

        err
    }

    async fn record_failed_create(
        &self,
        user_id: &str,
        resources: &ResourceSpec,
        err: &OrchestratorError,
    ) {
        let entry = NewAuditEntry::new(user_id, "create", AuditStatus::Failed)
            .metadata(json!({ "resources": resources }))
            .error(err.to_string());

        if let Err(audit_err) = self.audit.append(entry).await {
            warn!(user_id, error = %audit_err, "failed to audit rejected create");
        }
    }

    async fn run_side_effect(&self, env: &Environment, effect: SideEffect) -> Result<()> {
        let now = to_millis(Utc::now());

        match effect {
            SideEffect::None => {}
            SideEffect::Enqueue(kind) => {
                self.enqueue(env, kind).await?;
            }
            SideEffect::MarkStarted => {
                sqlx::query(
                    "UPDATE environments SET started_at = ?, last_activity_at = ? WHERE id = ?",
                )
                .bind(now)
                .bind(now)
                .bind(&env.id)
                .execute(&self.pool)
                .await?;
            }
            SideEffect::MarkStopped => {
                sqlx::query("UPDATE environments SET stopped_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(&env.id)
                    .execute(&self.pool)
                    .await?;
            }
            SideEffect::ReleaseAndDestroy => {
                self.release_capacity(env).await?;
                self.enqueue(env, JobKind::Destroy).await?;
            }
            SideEffect::MarkDestroyed => {
                sqlx::query(
                    "UPDATE environments SET destroyed_at = ?, stopped_at = COALESCE(stopped_at, ?) WHERE id = ?",
                )
                .bind(now)
                .bind(now)
                .bind(&env.id)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    /// Return the environment's reservation to its host exactly once.
    async fn release_capacity(&self, env: &Environment) -> Result<bool> {
        let Some(host_id) = env.host_id.as_deref() else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;

        let cleared = sqlx::query(
            "UPDATE environments SET capacity_reserved = 0 WHERE id = ? AND capacity_reserved = 1",
        )
        .bind(&env.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if cleared == 0 {
            return Ok(false);
        }

        release_with(&mut *tx, host_id, &env.resources).await?;
        tx.commit().await?;

        info!(environment_id = %env.id, host_id, "host capacity released");

        Ok(true)
    }

    async fn enqueue(&self, env: &Environment, kind: JobKind) -> Result<String> {
        let payload = match kind {
            JobKind::Provision => json!({
                "slug": env.slug,
                "hostId": env.host_id,
                "vcpus": env.resources.vcpus,
                "memoryMb": env.resources.memory_mb,
                "diskGb": env.resources.disk_gb,
                "accessToken": env.access_token,
                "repositoryUrl": env.repository_url,
                "initScript": env.init_script,
                "envVars": env.env_vars,
            }),
            JobKind::Start | JobKind::Stop | JobKind::Destroy => json!({
                "slug": env.slug,
                "hostId": env.host_id,
            }),
            JobKind::Execute => {
                return Err(OrchestratorError::InvalidInput(
                    "execute jobs carry code; use enqueue_execution".to_string(),
                ))
            }
        };

        Ok(self.jobs.enqueue(kind, &env.id, payload).await?)
    }

    /// Queue code for execution inside a running environment.
    pub async fn enqueue_execution(&self, env: &Environment, code: &str) -> Result<String> {
        if env.state != EnvironmentState::Running {
            return Err(OrchestratorError::InvalidInput(format!(
                "environment {} is {}, not running",
                env.slug, env.state
            )));
        }

        let job_id = self
            .jobs
            .enqueue(
                JobKind::Execute,
                &env.id,
                json!({ "slug": env.slug, "hostId": env.host_id, "code": code }),
            )
            .await?;

        self.audit
            .append(
                NewAuditEntry::new(&env.user_id, "execute", AuditStatus::InProgress)
                    .environment(&env.id)
                    .metadata(json!({ "jobId": job_id })),
            )
            .await?;

        Ok(job_id)
    }
}

async fn unique_slug(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<String> {
    for _ in 0..SLUG_ATTEMPTS {
        let slug = generate_slug();
        let taken: Option<i64> = sqlx::query_scalar("SELECT 1 FROM environments WHERE slug = ?")
            .bind(&slug)
            .fetch_optional(&mut **tx)
            .await?;

        if taken.is_none() {
            return Ok(slug);
        }
    }

    Err(OrchestratorError::InvalidInput(
        "could not allocate a unique slug".to_string(),
    ))
}
