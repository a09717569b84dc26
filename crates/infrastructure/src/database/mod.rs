pub mod sqlite;

use std::str::FromStr;

use jobledger_core::config::DatabaseConfig;
use jobledger_core::LedgerResult;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

/// 创建嵌入式SQLite连接池, 启用外键约束和WAL模式, 并执行迁移
pub async fn create_sqlite_pool(config: &DatabaseConfig) -> LedgerResult<SqlitePool> {
    debug!("Creating embedded SQLite pool at: {}", config.url);

    let connect_options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(
            config.connection_timeout_seconds,
        ))
        .connect_with(connect_options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// 运行数据库迁移
pub async fn run_migrations(pool: &SqlitePool) -> LedgerResult<()> {
    debug!("Running SQLite database migrations");

    // 作业定义表: 状态blob + 用于排序/到期查询的next_run_time列
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            next_run_time DATETIME,
            job_state BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 执行记录表: 每次触发(作业id + 计划运行时间)至多一行
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_executions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            scheduled_at DATETIME NOT NULL,
            status TEXT NOT NULL DEFAULT 'SENT',
            duration_seconds REAL,
            finished_at DATETIME,
            error_message TEXT,
            error_trace TEXT,
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE,
            UNIQUE (job_id, scheduled_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = vec![
        "CREATE INDEX IF NOT EXISTS idx_jobs_next_run_time ON jobs(next_run_time)",
        "CREATE INDEX IF NOT EXISTS idx_job_executions_job_id ON job_executions(job_id)",
        "CREATE INDEX IF NOT EXISTS idx_job_executions_scheduled_at ON job_executions(scheduled_at)",
        "CREATE INDEX IF NOT EXISTS idx_job_executions_status ON job_executions(status)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
