use chrono::{Duration, Utc};
use jobledger_core::config::DatabaseConfig;
use jobledger_core::LedgerError;
use jobledger_domain::entities::{canonical_time, Job, TriggerSpec};
use jobledger_domain::repositories::JobStore;
use jobledger_infrastructure::{create_sqlite_pool, SqliteJobStore};
use sqlx::SqlitePool;

async fn memory_pool() -> SqlitePool {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connection_timeout_seconds: 5,
    };
    create_sqlite_pool(&config).await.expect("create pool")
}

fn sample_job(id: &str) -> Job {
    let mut job = Job::new(id, "tasks.build_report");
    job.args = serde_json::json!(["daily", 3]);
    job.kwargs = serde_json::json!({"verbose": true});
    job.trigger = Some(TriggerSpec::Interval { seconds: 300 });
    job.misfire_grace_seconds = Some(60);
    job.max_instances = 2;
    job.next_run_time = Some(canonical_time(Utc::now()));
    job
}

#[tokio::test]
async fn test_add_then_lookup_round_trip() {
    let pool = memory_pool().await;
    let store = SqliteJobStore::new(pool);

    let job = sample_job("report");
    store.add_job(&job).await.expect("add");

    let found = store
        .lookup_job("report")
        .await
        .expect("lookup")
        .expect("job should exist");
    assert_eq!(found, job);
}

#[tokio::test]
async fn test_add_job_upserts_existing_definition() {
    let pool = memory_pool().await;
    let store = SqliteJobStore::new(pool);

    let mut job = sample_job("report");
    store.add_job(&job).await.expect("add");

    job.next_run_time = Some(canonical_time(Utc::now() + Duration::hours(1)));
    job.kwargs = serde_json::json!({"verbose": false});
    store.update_job(&job).await.expect("update");

    let found = store
        .lookup_job("report")
        .await
        .expect("lookup")
        .expect("job should exist");
    assert_eq!(found.next_run_time, job.next_run_time);
    assert_eq!(found.kwargs, serde_json::json!({"verbose": false}));
}

#[tokio::test]
async fn test_remove_unknown_job_fails() {
    let pool = memory_pool().await;
    let store = SqliteJobStore::new(pool);

    let result = store.remove_job("ghost").await;
    assert!(matches!(
        result,
        Err(LedgerError::JobNotFound { ref id }) if id == "ghost"
    ));
}

#[tokio::test]
async fn test_get_all_jobs_ordered_with_paused_last() {
    let pool = memory_pool().await;
    let store = SqliteJobStore::new(pool);
    let now = canonical_time(Utc::now());

    let mut late = sample_job("late");
    late.next_run_time = Some(now + Duration::minutes(30));
    let mut early = sample_job("early");
    early.next_run_time = Some(now + Duration::minutes(5));
    let mut paused = sample_job("paused");
    paused.next_run_time = None;

    store.add_job(&late).await.expect("add");
    store.add_job(&paused).await.expect("add");
    store.add_job(&early).await.expect("add");

    let jobs = store.get_all_jobs().await.expect("list");
    assert_eq!(
        jobs.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
        vec!["early", "late", "paused"]
    );
}

#[tokio::test]
async fn test_get_due_jobs_respects_cutoff() {
    let pool = memory_pool().await;
    let store = SqliteJobStore::new(pool);
    let now = canonical_time(Utc::now());

    let mut due = sample_job("due");
    due.next_run_time = Some(now - Duration::minutes(1));
    let mut future = sample_job("future");
    future.next_run_time = Some(now + Duration::minutes(10));
    let mut paused = sample_job("paused");
    paused.next_run_time = None;

    store.add_job(&due).await.expect("add");
    store.add_job(&future).await.expect("add");
    store.add_job(&paused).await.expect("add");

    let jobs = store.get_due_jobs(now).await.expect("due");
    assert_eq!(
        jobs.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
        vec!["due"]
    );
}

#[tokio::test]
async fn test_corrupt_blob_is_skipped_in_listings() {
    let pool = memory_pool().await;
    let store = SqliteJobStore::new(pool.clone());
    let now = canonical_time(Utc::now());

    let mut good = sample_job("good");
    good.next_run_time = Some(now - Duration::minutes(1));
    store.add_job(&good).await.expect("add");

    // 直接写入一行损坏的状态blob
    sqlx::query("INSERT INTO jobs (id, next_run_time, job_state) VALUES ($1, $2, $3)")
        .bind("corrupt")
        .bind(now - Duration::minutes(2))
        .bind(&b"\x00\x01garbage"[..])
        .execute(&pool)
        .await
        .expect("insert corrupt row");

    // 单行损坏不应让整个列表失败
    let all = store.get_all_jobs().await.expect("list must not abort");
    assert_eq!(
        all.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
        vec!["good"]
    );

    let due = store.get_due_jobs(now).await.expect("due must not abort");
    assert_eq!(due.len(), 1);

    // 点查损坏行时错误要暴露出来
    let result = store.lookup_job("corrupt").await;
    assert!(matches!(result, Err(LedgerError::CorruptJobState { .. })));
}

#[tokio::test]
async fn test_invalid_cron_trigger_rejected_on_add() {
    let pool = memory_pool().await;
    let store = SqliteJobStore::new(pool);

    let mut job = sample_job("bad-cron");
    job.trigger = Some(TriggerSpec::Cron {
        expr: "definitely not cron".to_string(),
    });

    let result = store.add_job(&job).await;
    assert!(matches!(result, Err(LedgerError::InvalidTaskParams(_))));
}
