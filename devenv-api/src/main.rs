use anyhow::Result;
use devenv_api::{create_app, start_janitor_task, AppState, Config};
use devenv_orchestrator::db::{backup_database, create_pool, run_migrations};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = devenv_logging::init_subscriber();

    info!("Starting devenv-api service...");

    let config = Config::from_env();
    info!(
        bind_addr = %config.bind_addr,
        db_path = %config.db_path.display(),
        reaper_interval_secs = config.reaper_interval_secs,
        "Configuration loaded"
    );

    // Backup before migrations
    let db_path = &config.db_path;
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let state = AppState::new(pool, config.orchestrator.clone());

    tokio::spawn(start_janitor_task(
        state.orchestrator.clone(),
        config.reaper_interval_secs,
    ));

    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("devenv-api stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
