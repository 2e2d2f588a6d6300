//! Integration tests for the expiry reaper
//!
//! The reaper destroys expired environments on behalf of their owners and
//! leaves everything else alone.

mod common;

use chrono::{Duration, Utc};
use devenv_api::reap_expired_environments;
use devenv_orchestrator::{EnvironmentState, JobKind, TransitionMetadata};

#[tokio::test]
async fn test_reaper_destroys_expired_environments() {
    let (state, _) = common::create_test_state().await;
    let host = common::fixture_host(&state, "hv-1").await;
    let expired = common::fixture_expired_environment(&state, "alice").await;
    let fresh = common::fixture_environment(&state, "alice").await;

    let reaped = reap_expired_environments(&state.orchestrator, Utc::now())
        .await
        .expect("sweep");
    assert_eq!(reaped, 1);

    let env = state.orchestrator.load_environment(&expired.id).await.unwrap();
    assert_eq!(env.state, EnvironmentState::Destroying);
    assert!(!env.capacity_reserved);

    let env = state.orchestrator.load_environment(&fresh.id).await.unwrap();
    assert_eq!(env.state, EnvironmentState::Provisioning);

    let host = state.orchestrator.hosts().get_host(&host.id).await.unwrap();
    assert_eq!(host.current_vms, 1);

    let jobs = state.jobs.jobs_for_environment(&expired.id).await.unwrap();
    let kinds: Vec<JobKind> = jobs.iter().map(|j| j.kind).collect();
    assert_eq!(kinds, vec![JobKind::Provision, JobKind::Destroy]);

    // Audit attributes the destroy to the owner
    let last = state
        .orchestrator
        .audit_for_environment(&expired.id)
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(last.user_id, "alice");
}

#[tokio::test]
async fn test_reaper_sweep_is_idempotent() {
    let (state, _) = common::create_test_state().await;
    common::fixture_host(&state, "hv-1").await;
    common::fixture_expired_environment(&state, "alice").await;

    let first = reap_expired_environments(&state.orchestrator, Utc::now())
        .await
        .unwrap();
    let second = reap_expired_environments(&state.orchestrator, Utc::now())
        .await
        .unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 0);
}

#[tokio::test]
async fn test_reaper_handles_errored_environments() {
    let (state, _) = common::create_test_state().await;
    let host = common::fixture_host(&state, "hv-1").await;
    let env = common::fixture_expired_environment(&state, "bob").await;

    state
        .orchestrator
        .transition_state(
            &env.id,
            EnvironmentState::Error,
            TransitionMetadata::message("hypervisor lost"),
        )
        .await
        .unwrap();

    let reaped = reap_expired_environments(&state.orchestrator, Utc::now())
        .await
        .unwrap();
    assert_eq!(reaped, 1);

    let host = state.orchestrator.hosts().get_host(&host.id).await.unwrap();
    assert_eq!(host.current_vms, 0);
    assert_eq!(host.current_vcpus, 0);
}

#[tokio::test]
async fn test_reaper_uses_supplied_clock() {
    let (state, _) = common::create_test_state().await;
    common::fixture_host(&state, "hv-1").await;
    common::fixture_environment(&state, "alice").await;

    let reaped = reap_expired_environments(&state.orchestrator, Utc::now())
        .await
        .unwrap();
    assert_eq!(reaped, 0);

    // Default lifetime is 24h
    let reaped = reap_expired_environments(&state.orchestrator, Utc::now() + Duration::hours(25))
        .await
        .unwrap();
    assert_eq!(reaped, 1);
}
