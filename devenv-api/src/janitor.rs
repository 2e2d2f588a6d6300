use chrono::{DateTime, Utc};
use devenv_orchestrator::EnvironmentOrchestrator;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Periodically tear down environments whose lifetime has run out.
pub async fn start_janitor_task(orchestrator: EnvironmentOrchestrator, interval_secs: u64) {
    let mut interval = interval(Duration::from_secs(interval_secs));

    info!(interval_secs, "Reaper task running");

    loop {
        interval.tick().await;

        match reap_expired_environments(&orchestrator, Utc::now()).await {
            Ok(0) => {}
            Ok(count) => info!(count, "Reaper queued expired environments for destruction"),
            Err(e) => error!("Reaper sweep failed: {}", e),
        }
    }
}

/// One sweep: destroy everything expired as of `now`, on behalf of its owner.
///
/// Failures on individual environments are logged and the sweep continues.
/// Returns how many were moved to `destroying`.
pub async fn reap_expired_environments(
    orchestrator: &EnvironmentOrchestrator,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let expired = orchestrator.get_expired_environments(now).await?;
    let mut reaped = 0;

    for env in expired {
        info!(
            environment_id = %env.id,
            slug = %env.slug,
            expires_at = %env.expires_at,
            "Lifetime expired, destroying environment"
        );

        match orchestrator.destroy_environment(&env.id, &env.user_id).await {
            Ok(()) => reaped += 1,
            Err(e) => error!(environment_id = %env.id, "Failed to destroy expired environment: {}", e),
        }
    }

    Ok(reaped)
}
