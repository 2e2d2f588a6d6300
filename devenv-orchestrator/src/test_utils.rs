use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{OrchestratorConfig, QuotaDefaults};
use crate::gateway::{GatewayError, JobKind, JobQueue, NotificationKind, Notifier};
use crate::host::{Host, RegisterHostRequest};
use crate::orchestrator::EnvironmentOrchestrator;

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Fixed configuration so tests don't depend on the process environment.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        default_vcpus: 2,
        default_memory_mb: 4096,
        default_disk_gb: 20,
        default_duration_hours: 24,
        max_duration_hours: 168,
        quota: QuotaDefaults {
            max_concurrent_environments: 3,
            max_vcpus_per_environment: 8,
            max_memory_mb_per_environment: 16384,
            max_disk_gb_per_environment: 100,
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedJob {
    pub id: String,
    pub kind: JobKind,
    pub environment_id: String,
    pub payload: serde_json::Value,
}

/// Job queue double that records work items and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingJobQueue {
    jobs: Arc<Mutex<Vec<RecordedJob>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingJobQueue {
    pub fn jobs(&self) -> Vec<RecordedJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds_for(&self, environment_id: &str) -> Vec<JobKind> {
        self.jobs()
            .into_iter()
            .filter(|job| job.environment_id == environment_id)
            .map(|job| job.kind)
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }
}

#[async_trait]
impl JobQueue for RecordingJobQueue {
    async fn enqueue(
        &self,
        kind: JobKind,
        environment_id: &str,
        payload: serde_json::Value,
    ) -> Result<String, GatewayError> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(GatewayError::Queue("queue offline".to_string()));
        }

        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let id = format!("job-{}", jobs.len() + 1);
        jobs.push(RecordedJob {
            id: id.clone(),
            kind,
            environment_id: environment_id.to_string(),
            payload,
        });

        Ok(id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<RecordedNotification>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<RecordedNotification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Result<(), GatewayError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedNotification {
                user_id: user_id.to_string(),
                kind,
                payload,
            });
        Ok(())
    }
}

/// Orchestrator over a fresh in-memory database with a recording job queue.
pub async fn test_orchestrator() -> (EnvironmentOrchestrator, RecordingJobQueue) {
    let pool = create_test_db().await;
    let jobs = RecordingJobQueue::default();
    let orchestrator = EnvironmentOrchestrator::new(pool, test_config(), Arc::new(jobs.clone()));
    (orchestrator, jobs)
}

/// Fixture: register a ready host
pub async fn fixture_host(
    orchestrator: &EnvironmentOrchestrator,
    name: &str,
    max_vms: i64,
    max_vcpus: i64,
    max_memory_mb: i64,
) -> Host {
    orchestrator
        .hosts()
        .register_host(RegisterHostRequest {
            name: name.to_string(),
            address: format!("{}.internal", name),
            max_vms,
            max_vcpus,
            max_memory_mb,
            status: None,
        })
        .await
        .expect("Failed to register fixture host")
}
