use devenv_orchestrator::{
    CommandProcessor, EnvironmentOrchestrator, Notifier, OrchestratorConfig, SqliteJobQueue,
    TracingNotifier,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: EnvironmentOrchestrator,
    pub commands: CommandProcessor,
    pub jobs: SqliteJobQueue,
}

impl AppState {
    /// Wire the orchestrator to the persisted job queue and log-only notifications.
    pub fn new(pool: SqlitePool, config: OrchestratorConfig) -> Self {
        Self::with_notifier(pool, config, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(
        pool: SqlitePool,
        config: OrchestratorConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let jobs = SqliteJobQueue::new(pool.clone());
        let orchestrator = EnvironmentOrchestrator::new(pool, config, Arc::new(jobs.clone()));

        Self {
            commands: CommandProcessor::new(orchestrator.clone(), notifier),
            orchestrator,
            jobs,
        }
    }
}
