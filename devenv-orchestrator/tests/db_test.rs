//! On-disk database bootstrap and storage-level guarantees.

use devenv_orchestrator::db::{backup_database, create_pool, run_migrations};
use devenv_orchestrator::{AuditLog, AuditStatus, NewAuditEntry};
use tempfile::TempDir;

#[tokio::test]
async fn test_file_database_bootstrap_and_backup() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("devenv.db");

    let pool = create_pool(&db_path).await.expect("pool");
    run_migrations(&pool).await.expect("migrations");
    // Re-running is a no-op
    run_migrations(&pool).await.expect("migrations are idempotent");

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
    for table in [
        "environment_audit_log",
        "environment_jobs",
        "environments",
        "hosts",
        "user_quotas",
    ] {
        assert!(tables.iter().any(|t| t == table), "missing {}", table);
    }
    pool.close().await;

    let backup = backup_database(&db_path).unwrap();
    assert!(backup.exists());
    assert_ne!(backup, db_path);
}

#[tokio::test]
async fn test_audit_rows_cannot_be_rewritten() {
    let pool = devenv_orchestrator::test_utils::create_test_db().await;
    let audit = AuditLog::new(pool.clone());

    let entry = audit
        .append(
            NewAuditEntry::new("alice", "create", AuditStatus::Success)
                .environment("env-1")
                .metadata(serde_json::json!({ "slug": "calm-otter-0001" })),
        )
        .await
        .unwrap();

    let update = sqlx::query("UPDATE environment_audit_log SET status = 'failed' WHERE id = ?")
        .bind(&entry.id)
        .execute(&pool)
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM environment_audit_log WHERE id = ?")
        .bind(&entry.id)
        .execute(&pool)
        .await;
    assert!(delete.is_err());

    let entries = audit.list_for_environment("env-1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::Success);
    assert_eq!(entries[0].metadata["slug"], "calm-otter-0001");
}
