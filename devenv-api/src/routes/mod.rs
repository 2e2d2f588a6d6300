pub mod commands;
pub mod environments;
pub mod health;
pub mod internal;

use crate::{auth::auth_middleware, state::AppState};
use axum::{middleware, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_app(state: AppState) -> Router {
    // Allow CORS for local development (frontend on different port)
    let cors = CorsLayer::permissive();

    Router::new()
        .merge(health::routes()) // Health routes don't need auth
        .merge(internal::routes()) // Worker callbacks, bound to the private network
        .merge(
            environments::routes()
                .merge(commands::routes())
                .layer(middleware::from_fn(auth_middleware)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
