//! Common test utilities and helpers for devenv-api tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use devenv_api::AppState;
use devenv_orchestrator::test_utils::{create_test_db, test_config, RecordingNotifier};
use devenv_orchestrator::{CreateEnvironmentRequest, EnvironmentDetails, Host, RegisterHostRequest};
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

/// App state over a fresh in-memory database, with notifications recorded.
pub async fn create_test_state() -> (AppState, RecordingNotifier) {
    let pool = create_test_db().await;
    let notifier = RecordingNotifier::default();
    let state = AppState::with_notifier(pool, test_config(), Arc::new(notifier.clone()));
    (state, notifier)
}

/// Fixture: a ready host with room for a handful of environments
pub async fn fixture_host(state: &AppState, name: &str) -> Host {
    state
        .orchestrator
        .hosts()
        .register_host(RegisterHostRequest {
            name: name.to_string(),
            address: format!("{}.internal", name),
            max_vms: 10,
            max_vcpus: 32,
            max_memory_mb: 65536,
            status: None,
        })
        .await
        .expect("Failed to register fixture host")
}

/// Fixture: an environment created directly through the orchestrator
pub async fn fixture_environment(state: &AppState, owner: &str) -> EnvironmentDetails {
    state
        .orchestrator
        .create_environment(CreateEnvironmentRequest {
            user_id: owner.to_string(),
            ..Default::default()
        })
        .await
        .expect("Failed to create fixture environment")
}

/// Fixture: an environment that expired an hour ago
pub async fn fixture_expired_environment(state: &AppState, owner: &str) -> EnvironmentDetails {
    let env = fixture_environment(state, owner).await;
    let past = chrono::Utc::now().timestamp_millis() - 3_600_000;

    sqlx::query("UPDATE environments SET expires_at = ? WHERE id = ?")
        .bind(past)
        .bind(&env.id)
        .execute(state.orchestrator.pool())
        .await
        .expect("Failed to backdate environment");

    env
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
}

impl TestClient {
    pub fn new(state: AppState) -> Self {
        Self {
            app: devenv_api::create_app(state),
        }
    }

    /// Send a request to the API
    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn send<T: serde::Serialize>(
        &self,
        method: &str,
        uri: &str,
        body: Option<&T>,
        user: Option<&str>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.send_request(request).await
    }

    pub async fn get(&self, uri: &str, user: Option<&str>) -> Response<Body> {
        self.send::<()>("GET", uri, None, user).await
    }

    pub async fn post<T: serde::Serialize>(
        &self,
        uri: &str,
        body: &T,
        user: Option<&str>,
    ) -> Response<Body> {
        self.send("POST", uri, Some(body), user).await
    }

    pub async fn put<T: serde::Serialize>(
        &self,
        uri: &str,
        body: &T,
        user: Option<&str>,
    ) -> Response<Body> {
        self.send("PUT", uri, Some(body), user).await
    }

    pub async fn delete(&self, uri: &str, user: Option<&str>) -> Response<Body> {
        self.send::<()>("DELETE", uri, None, user).await
    }
}
