use std::sync::Arc;
use std::time::Duration as StdDuration;

use jobledger_core::config::{DatabaseConfig, SchedulerConfig};
use jobledger_core::RetryPolicy;
use jobledger_domain::entities::{ExecutionFilter, ExecutionStatus, Job};
use jobledger_domain::repositories::{ExecutionRepository, JobStore};
use jobledger_infrastructure::{create_sqlite_pool, SqliteExecutionRepository, SqliteJobStore};
use jobledger_runtime::{ExecutionReconciler, RunNowOutcome, RunNowService, TaskRegistry};
use tokio::sync::Mutex;

struct Harness {
    _dir: tempfile::TempDir,
    job_store: Arc<SqliteJobStore>,
    execution_repository: Arc<SqliteExecutionRepository>,
    service: RunNowService,
}

async fn harness(registry: TaskRegistry, timeout_seconds: u64) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = DatabaseConfig {
        url: format!("sqlite:{}", dir.path().join("ledger.db").display()),
        max_connections: 5,
        min_connections: 1,
        connection_timeout_seconds: 5,
    };
    let pool = create_sqlite_pool(&config).await.expect("create pool");

    let job_store = Arc::new(SqliteJobStore::new(pool.clone()));
    let execution_repository = Arc::new(SqliteExecutionRepository::new(pool.clone()));
    let reconciler = Arc::new(ExecutionReconciler::new(
        execution_repository.clone(),
        Arc::new(Mutex::new(())),
        RetryPolicy::new(3, StdDuration::from_millis(1), StdDuration::from_millis(10)),
    ));

    let scheduler_config = SchedulerConfig {
        run_now_timeout_seconds: timeout_seconds,
        event_channel_capacity: 64,
        reconcile_max_retries: 3,
        reconcile_retry_base_ms: 1,
        reconcile_retry_max_ms: 10,
    };
    let service = RunNowService::new(
        job_store.clone() as Arc<dyn JobStore>,
        Arc::new(registry),
        reconciler,
        &scheduler_config,
    );

    Harness {
        _dir: dir,
        job_store,
        execution_repository,
        service,
    }
}

fn quick_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register_fn("tasks.noop", None, |_args, _kwargs| async { Ok(()) })
        .expect("register");
    registry
}

fn sleeper_registry(sleep: StdDuration) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register_fn("tasks.sleep", None, move |_args, _kwargs| async move {
            tokio::time::sleep(sleep).await;
            Ok(())
        })
        .expect("register");
    registry
}

#[tokio::test]
async fn test_missing_job_is_skipped_and_rest_executes() {
    let harness = harness(quick_registry(), 10).await;
    harness
        .job_store
        .add_job(&Job::new("j1", "tasks.noop"))
        .await
        .expect("add job");

    let report = harness
        .service
        .run_now(&["j1".to_string(), "j2".to_string()])
        .await
        .expect("run_now");

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0], ("j1".to_string(), RunNowOutcome::Executed));
    assert!(matches!(
        report.outcomes[1],
        (ref id, RunNowOutcome::Skipped { .. }) if id == "j2"
    ));
    assert!(!report.timed_out());
    assert!(report.timeout_error().is_none());
}

#[tokio::test]
async fn test_run_now_records_execution_history() {
    let harness = harness(quick_registry(), 10).await;
    harness
        .job_store
        .add_job(&Job::new("j1", "tasks.noop"))
        .await
        .expect("add job");

    let report = harness
        .service
        .run_now(&["j1".to_string()])
        .await
        .expect("run_now");
    assert!(!report.timed_out());

    // 临时调度器的执行同样要进入持久化历史
    let records = harness
        .execution_repository
        .list(&ExecutionFilter {
            job_id: Some("j1".to_string()),
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Succeeded);
    assert!(records[0].duration_seconds.is_some());
}

#[tokio::test]
async fn test_timeout_reports_pending_jobs_without_waiting() {
    let harness = harness(sleeper_registry(StdDuration::from_secs(10)), 1).await;
    harness
        .job_store
        .add_job(&Job::new("slow", "tasks.sleep"))
        .await
        .expect("add job");

    let started = std::time::Instant::now();
    let report = harness
        .service
        .run_now(&["slow".to_string()])
        .await
        .expect("run_now");
    let elapsed = started.elapsed();

    assert!(report.timed_out());
    assert_eq!(report.pending(), vec!["slow".to_string()]);
    assert_eq!(
        report.outcomes,
        vec![("slow".to_string(), RunNowOutcome::TimedOut)]
    );
    assert!(matches!(
        report.timeout_error(),
        Some(jobledger_core::LedgerError::RunNowTimeout { ref pending }) if pending == &vec!["slow".to_string()]
    ));
    // 放弃等待是尽力而为式拆除, 不等沉睡10秒的任务结束
    assert!(elapsed < StdDuration::from_secs(5));

    // 记录停留在已提交状态
    let records = harness
        .execution_repository
        .list(&ExecutionFilter {
            job_id: Some("slow".to_string()),
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Submitted);
}

#[tokio::test]
async fn test_failed_task_still_completes_the_batch() {
    let mut registry = TaskRegistry::new();
    registry
        .register_fn("tasks.fail", None, |_args, _kwargs| async {
            anyhow::bail!("boom")
        })
        .expect("register");
    let harness = harness(registry, 1).await;
    harness
        .job_store
        .add_job(&Job::new("j1", "tasks.fail"))
        .await
        .expect("add job");

    // 执行失败的作业不会发出executed事件, 批量操作以超时收尾
    let report = harness
        .service
        .run_now(&["j1".to_string()])
        .await
        .expect("run_now");
    assert!(report.timed_out());

    // 但失败会以错误状态留痕
    let records = harness
        .execution_repository
        .list(&ExecutionFilter {
            job_id: Some("j1".to_string()),
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Error);
    assert!(records[0].error_message.is_some());
}

#[tokio::test]
async fn test_empty_batch_returns_immediately() {
    let harness = harness(quick_registry(), 10).await;
    let started = std::time::Instant::now();
    let report = harness.service.run_now(&[]).await.expect("run_now");
    assert!(report.outcomes.is_empty());
    assert!(started.elapsed() < StdDuration::from_secs(1));
}
