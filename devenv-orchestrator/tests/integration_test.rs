//! Integration tests for devenv-orchestrator
//!
//! Covers quota enforcement, first-fit host reservation, the lifecycle state
//! machine, capacity release and the audit trail.

use chrono::{Duration, Utc};
use devenv_orchestrator::test_utils::{
    create_test_db, fixture_host, test_config, test_orchestrator, RecordingJobQueue,
};
use devenv_orchestrator::{
    AuditStatus, CreateEnvironmentRequest, EnvironmentOrchestrator, EnvironmentState, HostStatus,
    JobKind, JobQueue, JobStatus, NetworkInfo, OrchestratorError, QuotaDefaults, QuotaDimension,
    ResourceRequest, ResourceSpec, SqliteJobQueue, TransitionMetadata,
};
use std::sync::Arc;

fn request(user: &str, vcpus: i64, memory_mb: i64, disk_gb: i64) -> CreateEnvironmentRequest {
    CreateEnvironmentRequest {
        user_id: user.to_string(),
        resources: ResourceRequest {
            vcpus: Some(vcpus),
            memory_mb: Some(memory_mb),
            disk_gb: Some(disk_gb),
        },
        duration_hours: Some(24),
        ..Default::default()
    }
}

fn roomy_quota() -> QuotaDefaults {
    QuotaDefaults {
        max_concurrent_environments: 10,
        max_vcpus_per_environment: 64,
        max_memory_mb_per_environment: 262144,
        max_disk_gb_per_environment: 1000,
    }
}

async fn drive(orchestrator: &EnvironmentOrchestrator, id: &str, states: &[EnvironmentState]) {
    for state in states {
        orchestrator
            .transition_state(id, *state, TransitionMetadata::default())
            .await
            .unwrap_or_else(|e| panic!("transition to {} failed: {}", state, e));
    }
}

#[tokio::test]
async fn test_create_environment_reserves_host_and_queues_provisioning() {
    let (orchestrator, jobs) = test_orchestrator().await;
    let host = fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    let details = orchestrator
        .create_environment(request("alice", 2, 4096, 10))
        .await
        .expect("Failed to create environment");

    assert_eq!(details.state, EnvironmentState::Provisioning);
    assert!(details.expires_at > Utc::now());
    assert_eq!(details.access_token.len(), 64);

    let env = orchestrator.load_environment(&details.id).await.unwrap();
    assert_eq!(env.host_id.as_deref(), Some(host.id.as_str()));
    assert!(env.capacity_reserved);
    assert_eq!(
        env.resources,
        ResourceSpec {
            vcpus: 2,
            memory_mb: 4096,
            disk_gb: 10
        }
    );

    let host = orchestrator.hosts().get_host(&host.id).await.unwrap();
    assert_eq!(host.current_vms, 1);
    assert_eq!(host.current_vcpus, 2);
    assert_eq!(host.current_memory_mb, 4096);

    assert_eq!(jobs.kinds_for(&details.id), vec![JobKind::Provision]);
    let job = &jobs.jobs()[0];
    assert_eq!(job.payload["slug"], details.slug);
    assert_eq!(job.payload["vcpus"], 2);
}

#[tokio::test]
async fn test_defaults_fill_missing_resources() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    let details = orchestrator
        .create_environment(CreateEnvironmentRequest {
            user_id: "alice".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let env = orchestrator.load_environment(&details.id).await.unwrap();
    assert_eq!(env.resources.vcpus, 2);
    assert_eq!(env.resources.memory_mb, 4096);
    assert_eq!(env.resources.disk_gb, 20);

    let lifetime = env.expires_at - env.created_at;
    assert_eq!(lifetime, Duration::hours(24));
}

#[tokio::test]
async fn test_duration_out_of_range_is_rejected() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    for hours in [0, -5, 169] {
        let mut req = request("alice", 1, 1024, 10);
        req.duration_hours = Some(hours);
        let err = orchestrator.create_environment(req).await.unwrap_err();
        assert!(
            matches!(err, OrchestratorError::InvalidInput(_)),
            "{} hours: {:?}",
            hours,
            err
        );
    }
}

#[tokio::test]
async fn test_first_quota_check_creates_default_row() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    let spec = ResourceSpec {
        vcpus: 2,
        memory_mb: 4096,
        disk_gb: 10,
    };

    let quota = orchestrator
        .quotas()
        .check_quota("newcomer", &spec)
        .await
        .expect("first check must pass");

    assert_eq!(quota.max_concurrent_environments, 3);
    assert_eq!(quota.current_environments, 0);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_quotas WHERE user_id = ?")
        .bind("newcomer")
        .fetch_one(orchestrator.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn test_quota_check_leaves_existing_row_untouched() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    orchestrator
        .quotas()
        .set_quota("alice", roomy_quota())
        .await
        .unwrap();

    let spec = ResourceSpec {
        vcpus: 32,
        memory_mb: 4096,
        disk_gb: 10,
    };
    let quota = orchestrator.quotas().check_quota("alice", &spec).await.unwrap();

    assert_eq!(quota.max_vcpus_per_environment, 64);
}

#[tokio::test]
async fn test_concurrency_quota_counts_only_active_environments() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    let mut created = Vec::new();
    for _ in 0..3 {
        created.push(
            orchestrator
                .create_environment(request("alice", 1, 1024, 10))
                .await
                .unwrap(),
        );
    }

    let err = orchestrator
        .create_environment(request("alice", 1, 1024, 10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::QuotaExceeded {
            dimension: QuotaDimension::Concurrency
        }
    ));

    // Another user is unaffected
    orchestrator
        .create_environment(request("bob", 1, 1024, 10))
        .await
        .expect("bob has his own quota");

    // Destroying one frees a slot
    drive(
        &orchestrator,
        &created[0].id,
        &[EnvironmentState::Destroying, EnvironmentState::Destroyed],
    )
    .await;

    orchestrator
        .create_environment(request("alice", 1, 1024, 10))
        .await
        .expect("slot should be free after destroy");
}

#[tokio::test]
async fn test_per_resource_ceilings() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    fixture_host(&orchestrator, "hv-1", 10, 64, 262144).await;

    let cases = [
        (9, 1024, 10, QuotaDimension::Vcpus),
        (1, 16385, 10, QuotaDimension::Memory),
        (1, 1024, 101, QuotaDimension::Disk),
    ];

    for (vcpus, memory_mb, disk_gb, expected) in cases {
        let err = orchestrator
            .create_environment(request("alice", vcpus, memory_mb, disk_gb))
            .await
            .unwrap_err();

        match err {
            OrchestratorError::QuotaExceeded { dimension } => assert_eq!(dimension, expected),
            other => panic!("expected quota error, got {:?}", other),
        }
    }

    // At the ceiling is fine
    orchestrator
        .create_environment(request("alice", 8, 16384, 100))
        .await
        .expect("exactly at the ceiling");

    let host = &orchestrator.hosts().list_hosts().await.unwrap()[0];
    assert_eq!(host.current_vcpus, 8);
}

#[tokio::test]
async fn test_rejected_create_is_audited() {
    let (orchestrator, _jobs) = test_orchestrator().await;

    let err = orchestrator
        .create_environment(request("alice", 1, 1024, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NoCapacity));

    let entries = orchestrator.audit_for_user("alice").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "create");
    assert_eq!(entries[0].status, AuditStatus::Failed);
    assert!(entries[0].environment_id.is_none());
}

#[tokio::test]
async fn test_one_free_vcpu_rejects_two_vcpu_request() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    orchestrator
        .quotas()
        .set_quota("alice", roomy_quota())
        .await
        .unwrap();
    let host = fixture_host(&orchestrator, "hv-1", 10, 16, 65536).await;

    orchestrator
        .create_environment(request("alice", 15, 1024, 10))
        .await
        .unwrap();

    let err = orchestrator
        .hosts()
        .find_and_reserve_host(&ResourceSpec {
            vcpus: 2,
            memory_mb: 1024,
            disk_gb: 10,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NoCapacity));

    let host = orchestrator.hosts().get_host(&host.id).await.unwrap();
    assert_eq!(host.current_vcpus, 15);
    assert_eq!(host.current_vms, 1);
}

#[tokio::test]
async fn test_first_fit_uses_oldest_ready_host() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    let first = fixture_host(&orchestrator, "hv-1", 1, 8, 16384).await;
    let second = fixture_host(&orchestrator, "hv-2", 4, 8, 16384).await;
    let hosts = orchestrator.hosts();

    let spec = ResourceSpec {
        vcpus: 2,
        memory_mb: 2048,
        disk_gb: 10,
    };

    let a = hosts.find_and_reserve_host(&spec).await.unwrap();
    assert_eq!(a.id, first.id);
    assert_eq!(a.status, HostStatus::Full);

    let b = hosts.find_and_reserve_host(&spec).await.unwrap();
    assert_eq!(b.id, second.id);
    assert_eq!(b.status, HostStatus::Ready);

    // Releasing the full host makes it eligible again
    let released = hosts.release_host(&first.id, &spec).await.unwrap();
    assert_eq!(released.status, HostStatus::Ready);
    assert_eq!(released.current_vcpus, 0);

    let c = hosts.find_and_reserve_host(&spec).await.unwrap();
    assert_eq!(c.id, first.id);
}

#[tokio::test]
async fn test_maintenance_hosts_are_skipped() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    let host = fixture_host(&orchestrator, "hv-1", 4, 8, 16384).await;
    orchestrator
        .hosts()
        .set_host_status(&host.id, HostStatus::Maintenance)
        .await
        .unwrap();

    let err = orchestrator
        .create_environment(request("alice", 1, 1024, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NoCapacity));
}

#[tokio::test]
async fn test_release_clamps_at_zero() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    let host = fixture_host(&orchestrator, "hv-1", 4, 8, 16384).await;

    let released = orchestrator
        .hosts()
        .release_host(
            &host.id,
            &ResourceSpec {
                vcpus: 4,
                memory_mb: 8192,
                disk_gb: 10,
            },
        )
        .await
        .unwrap();

    assert_eq!(released.current_vms, 0);
    assert_eq!(released.current_vcpus, 0);
    assert_eq!(released.current_memory_mb, 0);
}

#[tokio::test]
async fn test_transition_from_destroyed_is_rejected_without_mutation() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    let details = orchestrator
        .create_environment(request("alice", 2, 4096, 10))
        .await
        .unwrap();
    drive(
        &orchestrator,
        &details.id,
        &[EnvironmentState::Destroying, EnvironmentState::Destroyed],
    )
    .await;

    let before = orchestrator.load_environment(&details.id).await.unwrap();

    let err = orchestrator
        .transition_state(
            &details.id,
            EnvironmentState::Running,
            TransitionMetadata::message("should not apply"),
        )
        .await
        .unwrap_err();

    match err {
        OrchestratorError::InvalidTransition { from, to } => {
            assert_eq!(from, EnvironmentState::Destroyed);
            assert_eq!(to, EnvironmentState::Running);
        }
        other => panic!("expected invalid transition, got {:?}", other),
    }

    let after = orchestrator.load_environment(&details.id).await.unwrap();
    assert_eq!(after.state, EnvironmentState::Destroyed);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(after.state_message, before.state_message);

    let last = orchestrator
        .audit_for_environment(&details.id)
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(last.status, AuditStatus::Failed);
    assert_eq!(last.metadata["previousState"], "destroyed");
    assert_eq!(last.metadata["newState"], "running");
}

#[tokio::test]
async fn test_destroying_twice_releases_capacity_once() {
    let (orchestrator, jobs) = test_orchestrator().await;
    let host = fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    let keep = orchestrator
        .create_environment(request("alice", 2, 4096, 10))
        .await
        .unwrap();
    let doomed = orchestrator
        .create_environment(request("alice", 2, 4096, 10))
        .await
        .unwrap();

    let before = orchestrator.hosts().get_host(&host.id).await.unwrap();
    assert_eq!(before.current_vcpus, 4);
    assert_eq!(before.current_memory_mb, 8192);

    orchestrator
        .destroy_environment(&doomed.id, "alice")
        .await
        .unwrap();
    orchestrator
        .transition_state(
            &doomed.id,
            EnvironmentState::Destroying,
            TransitionMetadata::message("retry"),
        )
        .await
        .expect("re-entering destroying is allowed");

    let after = orchestrator.hosts().get_host(&host.id).await.unwrap();
    assert_eq!(after.current_vcpus, 2);
    assert_eq!(after.current_memory_mb, 4096);
    assert_eq!(after.current_vms, 1);

    let env = orchestrator.load_environment(&doomed.id).await.unwrap();
    assert!(!env.capacity_reserved);

    // Both entries re-issue the destroy request
    assert_eq!(
        jobs.kinds_for(&doomed.id),
        vec![JobKind::Provision, JobKind::Destroy, JobKind::Destroy]
    );
    assert_eq!(jobs.kinds_for(&keep.id), vec![JobKind::Provision]);
}

#[tokio::test]
async fn test_errored_environment_can_still_be_destroyed() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    let host = fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    let details = orchestrator
        .create_environment(request("alice", 2, 4096, 10))
        .await
        .unwrap();
    orchestrator
        .transition_state(
            &details.id,
            EnvironmentState::Error,
            TransitionMetadata::message("agent unreachable"),
        )
        .await
        .unwrap();

    let env = orchestrator.load_environment(&details.id).await.unwrap();
    assert_eq!(env.state_message.as_deref(), Some("agent unreachable"));

    // Errored environments don't count toward concurrency
    let quota = orchestrator.quotas().get_quota("alice").await.unwrap();
    assert_eq!(quota.current_environments, 0);

    orchestrator
        .destroy_environment(&details.id, "alice")
        .await
        .unwrap();

    let host = orchestrator.hosts().get_host(&host.id).await.unwrap();
    assert_eq!(host.current_vcpus, 0);
    assert_eq!(host.current_vms, 0);
}

#[tokio::test]
async fn test_destroy_by_another_user_is_not_found() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    let details = orchestrator
        .create_environment(request("alice", 2, 4096, 10))
        .await
        .unwrap();

    let err = orchestrator
        .destroy_environment(&details.id, "mallory")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let env = orchestrator.load_environment(&details.id).await.unwrap();
    assert_eq!(env.state, EnvironmentState::Provisioning);
}

#[tokio::test]
async fn test_running_and_stopped_hooks_stamp_timestamps() {
    let (orchestrator, jobs) = test_orchestrator().await;
    fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    let details = orchestrator
        .create_environment(request("alice", 2, 4096, 10))
        .await
        .unwrap();

    drive(&orchestrator, &details.id, &[EnvironmentState::Starting]).await;

    orchestrator
        .transition_state(
            &details.id,
            EnvironmentState::Running,
            TransitionMetadata {
                message: Some("VM booted".to_string()),
                network: Some(NetworkInfo {
                    ip_address: Some("10.1.0.7".to_string()),
                    ssh_port: Some(2222),
                    vscode_port: Some(8443),
                    ws_endpoint: Some("wss://hv-1.internal/ws/7".to_string()),
                }),
                details: Default::default(),
            },
        )
        .await
        .unwrap();

    let env = orchestrator.load_environment(&details.id).await.unwrap();
    assert!(env.started_at.is_some());
    assert!(env.last_activity_at.is_some());
    assert_eq!(env.network.ip_address.as_deref(), Some("10.1.0.7"));
    assert_eq!(env.network.ssh_port, Some(2222));

    let listed = orchestrator.get_environment(&details.id).await.unwrap().unwrap();
    assert_eq!(listed.vscode_port, Some(8443));

    drive(
        &orchestrator,
        &details.id,
        &[EnvironmentState::Stopping, EnvironmentState::Stopped],
    )
    .await;
    let env = orchestrator.load_environment(&details.id).await.unwrap();
    assert!(env.stopped_at.is_some());
    // Network details survive transitions that don't report them
    assert_eq!(env.network.ip_address.as_deref(), Some("10.1.0.7"));

    // Restart skips provisioning
    orchestrator
        .start_environment(&details.id, "alice")
        .await
        .unwrap();

    assert_eq!(
        jobs.kinds_for(&details.id),
        vec![
            JobKind::Provision,
            JobKind::Start,
            JobKind::Stop,
            JobKind::Start
        ]
    );
}

#[tokio::test]
async fn test_full_lifecycle_audit_trail() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    let host = fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    let mut req = request("alice", 2, 4096, 10);
    req.duration_hours = Some(24);
    let details = orchestrator.create_environment(req).await.unwrap();

    drive(
        &orchestrator,
        &details.id,
        &[
            EnvironmentState::Starting,
            EnvironmentState::Running,
            EnvironmentState::Stopping,
            EnvironmentState::Stopped,
            EnvironmentState::Destroying,
            EnvironmentState::Destroyed,
        ],
    )
    .await;

    let entries = orchestrator.audit_for_environment(&details.id).await.unwrap();
    assert_eq!(entries.len(), 8);
    assert_eq!(entries[0].action, "create");
    assert!(entries[1..].iter().all(|e| e.action == "transition"));
    assert!(entries.iter().all(|e| e.status == AuditStatus::Success));
    assert!(entries
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));

    let transitions: Vec<(String, String)> = entries[1..]
        .iter()
        .map(|e| {
            (
                e.metadata["previousState"].as_str().unwrap().to_string(),
                e.metadata["newState"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(transitions[0], ("requested".to_string(), "provisioning".to_string()));
    assert_eq!(transitions[6], ("destroying".to_string(), "destroyed".to_string()));

    let env = orchestrator.load_environment(&details.id).await.unwrap();
    assert!(env.destroyed_at.is_some());

    let listed = orchestrator.list_environments("alice").await.unwrap();
    assert!(listed.iter().all(|e| e.id != details.id));

    let quota = orchestrator.quotas().get_quota("alice").await.unwrap();
    assert_eq!(quota.current_environments, 0);

    let host = orchestrator.hosts().get_host(&host.id).await.unwrap();
    assert_eq!(host.current_vms, 0);
    assert_eq!(host.current_vcpus, 0);
    assert_eq!(host.current_memory_mb, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_cannot_overcommit_a_host() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    let host = fixture_host(&orchestrator, "hv-1", 10, 4, 65536).await;

    let spawn_create = |user: &'static str| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .create_environment(request(user, 3, 4096, 10))
                .await
        })
    };

    let (a, b) = tokio::join!(spawn_create("alice"), spawn_create("bob"));
    let results = [a.unwrap(), b.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one create may win: {:?}", results);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(OrchestratorError::NoCapacity))));

    let host = orchestrator.hosts().get_host(&host.id).await.unwrap();
    assert_eq!(host.current_vcpus, 3);
    assert_eq!(host.current_vms, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_respect_user_concurrency_limit() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;
    orchestrator
        .quotas()
        .set_quota(
            "alice",
            QuotaDefaults {
                max_concurrent_environments: 1,
                ..roomy_quota()
            },
        )
        .await
        .unwrap();

    let creates = (0..4).map(|_| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .create_environment(request("alice", 1, 1024, 10))
                .await
        })
    });

    let results: Vec<_> = futures_util::future::join_all(creates)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(
                r,
                Err(OrchestratorError::QuotaExceeded {
                    dimension: QuotaDimension::Concurrency
                })
            ))
            .count(),
        3
    );
}

#[tokio::test]
async fn test_queue_failure_keeps_row_and_audit_trail() {
    let pool = create_test_db().await;
    let jobs = RecordingJobQueue::default();
    let orchestrator = EnvironmentOrchestrator::new(pool, test_config(), Arc::new(jobs.clone()));
    fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    jobs.set_failing(true);
    let err = orchestrator
        .create_environment(request("alice", 2, 4096, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ExternalService(_)));

    let entries = orchestrator.audit_for_user("alice").await.unwrap();
    let env_id = entries[0].environment_id.clone().expect("row was created");
    let actions: Vec<(&str, AuditStatus)> = entries
        .iter()
        .map(|e| (e.action.as_str(), e.status))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("create", AuditStatus::Success),
            ("transition", AuditStatus::Success),
            ("side_effect", AuditStatus::Failed),
        ]
    );

    let env = orchestrator.load_environment(&env_id).await.unwrap();
    assert_eq!(env.state, EnvironmentState::Provisioning);
}

#[tokio::test]
async fn test_expired_environments_are_reported() {
    let (orchestrator, _jobs) = test_orchestrator().await;
    fixture_host(&orchestrator, "hv-1", 10, 32, 65536).await;

    let short = orchestrator
        .create_environment(CreateEnvironmentRequest {
            duration_hours: Some(1),
            ..request("alice", 1, 1024, 10)
        })
        .await
        .unwrap();
    let long = orchestrator
        .create_environment(CreateEnvironmentRequest {
            duration_hours: Some(48),
            ..request("alice", 1, 1024, 10)
        })
        .await
        .unwrap();

    let expired = orchestrator
        .get_expired_environments(Utc::now() + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, short.id);

    // Already being torn down: not reported again
    orchestrator
        .destroy_environment(&short.id, "alice")
        .await
        .unwrap();
    let expired = orchestrator
        .get_expired_environments(Utc::now() + Duration::hours(72))
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, long.id);
}

#[tokio::test]
async fn test_sqlite_job_queue_claim_and_complete() {
    let pool = create_test_db().await;
    let queue = SqliteJobQueue::new(pool);

    let first = queue
        .enqueue(JobKind::Provision, "env-1", serde_json::json!({ "slug": "a" }))
        .await
        .unwrap();
    queue
        .enqueue(JobKind::Destroy, "env-2", serde_json::json!({}))
        .await
        .unwrap();

    let claimed = queue.claim_next().await.unwrap().expect("pending job");
    assert_eq!(claimed.id, first);
    assert_eq!(claimed.kind, JobKind::Provision);
    assert_eq!(claimed.status, JobStatus::Claimed);
    assert_eq!(claimed.payload["slug"], "a");

    let done = queue.complete(&first, None).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(queue.complete(&first, None).await.is_err());

    let second = queue.claim_next().await.unwrap().unwrap();
    assert_eq!(second.environment_id, "env-2");
    let failed = queue
        .complete(&second.id, Some("agent timeout".to_string()))
        .await
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);

    assert!(queue.claim_next().await.unwrap().is_none());
    assert_eq!(queue.jobs_for_environment("env-1").await.unwrap().len(), 1);
}
