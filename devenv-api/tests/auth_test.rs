//! Authentication middleware tests
//!
//! User routes need an identity header; health and internal routes do not.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::TestClient;
use devenv_orchestrator::EnvironmentDetails;
use serde_json::json;

#[tokio::test]
async fn test_user_routes_require_identity() {
    let (state, _) = common::create_test_state().await;
    let client = TestClient::new(state);

    let response = client.get("/api/v1/environments", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .post("/api/v1/environments", &json!({}), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .post("/api/v1/commands", &json!({ "subject": "list" }), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_blank_identity_is_rejected() {
    let (state, _) = common::create_test_state().await;
    let client = TestClient::new(state);

    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/environments")
        .header("x-user", "   ")
        .body(Body::empty())
        .unwrap();

    let response = client.send_request(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_forwarded_user_takes_precedence() {
    let (state, _) = common::create_test_state().await;
    common::fixture_host(&state, "hv-1").await;
    common::fixture_environment(&state, "alice").await;
    let client = TestClient::new(state);

    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/environments")
        .header("x-forwarded-user", "alice")
        .header("x-user", "bob")
        .body(Body::empty())
        .unwrap();

    let response = client.send_request(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let envs: Vec<EnvironmentDetails> = common::extract_json_body(response).await;
    assert_eq!(envs.len(), 1);
}

#[tokio::test]
async fn test_health_and_internal_routes_are_open() {
    let (state, _) = common::create_test_state().await;
    let client = TestClient::new(state);

    let response = client.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.get("/internal/v1/hosts", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}
