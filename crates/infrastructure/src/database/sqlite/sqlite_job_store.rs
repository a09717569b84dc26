use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobledger_core::{LedgerError, LedgerResult};
use jobledger_domain::entities::{canonical_time, Job};
use jobledger_domain::repositories::JobStore;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument, warn};

/// 持久化作业存储适配器
///
/// 将调度器的作业抽象落到jobs表: 整个作业文档序列化为状态blob,
/// next_run_time单独成列供排序与到期查询使用。
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> LedgerResult<Job> {
        let id: String = row.try_get("id")?;
        let blob: Vec<u8> = row.try_get("job_state")?;
        let mut job = Job::from_state_blob(&id, &blob)?;
        // 列值在upsert时与blob同步写入, 以列值为准
        job.next_run_time = row.try_get("next_run_time")?;
        Ok(job)
    }

    /// 逐行反序列化, 损坏的blob跳过并告警, 不中断整个列表
    fn rows_to_jobs(rows: &[sqlx::sqlite::SqliteRow]) -> LedgerResult<Vec<Job>> {
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::row_to_job(row) {
                Ok(job) => jobs.push(job),
                Err(LedgerError::CorruptJobState { id, reason }) => {
                    warn!("作业 {} 的状态blob损坏, 已跳过: {}", id, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, task_name = %job.task_name))]
    async fn add_job(&self, job: &Job) -> LedgerResult<()> {
        if let Some(trigger) = &job.trigger {
            trigger.validate()?;
        }

        let state = job.to_state_blob()?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, next_run_time, job_state)
            VALUES ($1, $2, $3)
            ON CONFLICT(id) DO UPDATE SET
                next_run_time = excluded.next_run_time,
                job_state = excluded.job_state
            "#,
        )
        .bind(&job.id)
        .bind(job.next_run_time.map(canonical_time))
        .bind(state)
        .execute(&self.pool)
        .await?;

        debug!("写入作业定义成功: {}", job.entity_description());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> LedgerResult<()> {
        self.add_job(job).await
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn remove_job(&self, id: &str) -> LedgerResult<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::job_not_found(id));
        }

        debug!("删除作业成功: {}", id);
        Ok(())
    }

    async fn lookup_job(&self, id: &str) -> LedgerResult<Option<Job>> {
        let row = sqlx::query("SELECT id, next_run_time, job_state FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_all_jobs(&self) -> LedgerResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT id, next_run_time, job_state FROM jobs
             ORDER BY next_run_time IS NULL, next_run_time ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let jobs = Self::rows_to_jobs(&rows)?;
        debug!("查询作业列表成功, 返回 {} 个作业", jobs.len());
        Ok(jobs)
    }

    async fn get_due_jobs(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT id, next_run_time, job_state FROM jobs
             WHERE next_run_time IS NOT NULL AND next_run_time <= $1
             ORDER BY next_run_time ASC",
        )
        .bind(canonical_time(cutoff))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_jobs(&rows)
    }
}
