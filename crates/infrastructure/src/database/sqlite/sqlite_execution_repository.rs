use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jobledger_core::{LedgerError, LedgerResult};
use jobledger_domain::entities::{
    canonical_time, ExecutionFilter, ExecutionRecord, ExecutionStatus,
};
use jobledger_domain::repositories::{ExecutionChange, ExecutionRepository};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

const EXECUTION_COLUMNS: &str = "id, job_id, scheduled_at, status, duration_seconds, \
                                 finished_at, error_message, error_trace";

/// 执行记录仓储
pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> LedgerResult<ExecutionRecord> {
        Ok(ExecutionRecord {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            scheduled_at: row.try_get("scheduled_at")?,
            status: row.try_get("status")?,
            duration_seconds: row.try_get("duration_seconds")?,
            finished_at: row.try_get("finished_at")?,
            error_message: row.try_get("error_message")?,
            error_trace: row.try_get("error_trace")?,
        })
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    #[instrument(skip(self, change), fields(
        job_id = %change.job_id,
        scheduled_at = %change.scheduled_at,
        status = %change.status.as_str(),
    ))]
    async fn reconcile(&self, change: &ExecutionChange) -> LedgerResult<ExecutionRecord> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions
             WHERE job_id = $1 AND scheduled_at = $2"
        ))
        .bind(&change.job_id)
        .bind(change.scheduled_at)
        .fetch_optional(&mut *tx)
        .await?;

        let record = match existing {
            Some(row) => {
                let current = Self::row_to_execution(&row)?;
                if change.status == ExecutionStatus::Submitted {
                    // 调度器不保证事件顺序: 终态之后到达的提交事件直接丢弃,
                    // 不允许记录状态回退
                    tx.commit().await?;
                    debug!(
                        "丢弃迟到的提交事件: 作业 {} 在 {} 已有记录",
                        change.job_id, change.scheduled_at
                    );
                    return Ok(current);
                }

                sqlx::query(
                    r#"
                    UPDATE job_executions
                    SET status = $3, duration_seconds = $4, finished_at = $5,
                        error_message = COALESCE($6, error_message),
                        error_trace = COALESCE($7, error_trace)
                    WHERE job_id = $1 AND scheduled_at = $2
                    "#,
                )
                .bind(&change.job_id)
                .bind(change.scheduled_at)
                .bind(change.status)
                .bind(change.duration_seconds)
                .bind(change.finished_at)
                .bind(&change.error_message)
                .bind(&change.error_trace)
                .execute(&mut *tx)
                .await?;

                ExecutionRecord {
                    id: current.id,
                    job_id: change.job_id.clone(),
                    scheduled_at: change.scheduled_at,
                    status: change.status,
                    duration_seconds: change.duration_seconds,
                    finished_at: change.finished_at,
                    error_message: change.error_message.clone().or(current.error_message),
                    error_trace: change.error_trace.clone().or(current.error_trace),
                }
            }
            None => {
                let row = sqlx::query(&format!(
                    "INSERT INTO job_executions
                         (job_id, scheduled_at, status, duration_seconds, finished_at,
                          error_message, error_trace)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     RETURNING {EXECUTION_COLUMNS}"
                ))
                .bind(&change.job_id)
                .bind(change.scheduled_at)
                .bind(change.status)
                .bind(change.duration_seconds)
                .bind(change.finished_at)
                .bind(&change.error_message)
                .bind(&change.error_trace)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    if let sqlx::Error::Database(db) = &e {
                        if db.is_unique_violation() {
                            // 并发写入者抢先插入了同一触发的记录, 交由上层重试
                            return LedgerError::ReconciliationConflict(format!(
                                "作业 {} 在 {} 的执行记录已被并发创建",
                                change.job_id, change.scheduled_at
                            ));
                        }
                    }
                    LedgerError::Database(e)
                })?;
                Self::row_to_execution(&row)?
            }
        };

        tx.commit().await?;
        debug!("对账执行记录成功: {}", record.entity_description());
        Ok(record)
    }

    async fn get_by_id(&self, id: i64) -> LedgerResult<Option<ExecutionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_execution(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_by_key(
        &self,
        job_id: &str,
        scheduled_at: DateTime<Utc>,
    ) -> LedgerResult<Option<ExecutionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions
             WHERE job_id = $1 AND scheduled_at = $2"
        ))
        .bind(job_id)
        .bind(canonical_time(scheduled_at))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_execution(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &ExecutionFilter) -> LedgerResult<Vec<ExecutionRecord>> {
        let mut query =
            format!("SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE 1=1");
        let mut bind_count = 0;

        if filter.job_id.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND job_id = ${bind_count}"));
        }
        if filter.status.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND status = ${bind_count}"));
        }
        if filter.scheduled_from.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND scheduled_at >= ${bind_count}"));
        }
        if filter.scheduled_until.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND scheduled_at <= ${bind_count}"));
        }

        query.push_str(" ORDER BY scheduled_at DESC");

        if filter.limit.is_some() {
            bind_count += 1;
            query.push_str(&format!(" LIMIT ${bind_count}"));
        }

        let mut sqlx_query = sqlx::query(&query);
        if let Some(job_id) = &filter.job_id {
            sqlx_query = sqlx_query.bind(job_id);
        }
        if let Some(status) = filter.status {
            sqlx_query = sqlx_query.bind(status);
        }
        if let Some(from) = filter.scheduled_from {
            sqlx_query = sqlx_query.bind(canonical_time(from));
        }
        if let Some(until) = filter.scheduled_until {
            sqlx_query = sqlx_query.bind(canonical_time(until));
        }
        if let Some(limit) = filter.limit {
            sqlx_query = sqlx_query.bind(limit);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        let records: LedgerResult<Vec<ExecutionRecord>> =
            rows.iter().map(Self::row_to_execution).collect();
        records
    }

    async fn average_duration(&self, job_id: &str) -> LedgerResult<Option<f64>> {
        let row = sqlx::query(
            "SELECT AVG(duration_seconds) AS avg_duration FROM job_executions
             WHERE job_id = $1 AND duration_seconds IS NOT NULL",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        let avg: Option<f64> = row.try_get("avg_duration")?;
        Ok(avg)
    }

    async fn delete_older_than(&self, max_age_seconds: i64) -> LedgerResult<u64> {
        let cutoff = canonical_time(Utc::now() - Duration::seconds(max_age_seconds));
        let result = sqlx::query("DELETE FROM job_executions WHERE scheduled_at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        debug!("清理了 {} 条过期执行记录 (早于 {})", deleted, cutoff);
        Ok(deleted)
    }
}
