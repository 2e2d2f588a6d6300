use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use devenv_orchestrator::HostStatus;
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "devenv-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = sqlx::query("SELECT 1")
        .fetch_one(state.orchestrator.pool())
        .await
        .is_ok();

    let ready_hosts = state
        .orchestrator
        .hosts()
        .list_hosts()
        .await
        .map(|hosts| {
            hosts
                .iter()
                .filter(|h| h.status == HostStatus::Ready)
                .count()
        })
        .unwrap_or(0);

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if db_ok { "ready" } else { "not_ready" },
            "service": "devenv-api",
            "version": env!("CARGO_PKG_VERSION"),
            "database": if db_ok { "connected" } else { "disconnected" },
            "ready_hosts": ready_hosts
        })),
    )
}
