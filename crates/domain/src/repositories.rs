//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobledger_core::LedgerResult;

use crate::entities::{ExecutionFilter, ExecutionRecord, ExecutionStatus, Job};

/// 作业存储适配器抽象
///
/// 同一契约服务于两类实例: 与主调度器共享的持久化存储, 以及支撑
/// "立即执行"临时调度器的内存存储。两者绝不共享底层数据。
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 写入作业定义(upsert语义)
    async fn add_job(&self, job: &Job) -> LedgerResult<()>;
    /// 更新作业定义(upsert语义)
    async fn update_job(&self, job: &Job) -> LedgerResult<()>;
    /// 删除作业; 未知id返回JobNotFound
    async fn remove_job(&self, id: &str) -> LedgerResult<()>;
    async fn lookup_job(&self, id: &str) -> LedgerResult<Option<Job>>;
    /// 按next_run_time升序返回全部作业, 暂停作业排在末尾
    async fn get_all_jobs(&self) -> LedgerResult<Vec<Job>>;
    /// 返回next_run_time不晚于cutoff的作业
    async fn get_due_jobs(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Job>>;
}

/// 一次对账要写入的变更内容
#[derive(Debug, Clone)]
pub struct ExecutionChange {
    pub job_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub duration_seconds: Option<f64>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
}

/// 执行记录仓储抽象
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// 在单个原子事务内按(job_id, scheduled_at)取出或创建记录并应用变更
    ///
    /// 已有记录收到Submitted变更时原样返回(乱序事件丢弃策略);
    /// 插入时的唯一约束冲突映射为可重试的ReconciliationConflict。
    async fn reconcile(&self, change: &ExecutionChange) -> LedgerResult<ExecutionRecord>;
    async fn get_by_id(&self, id: i64) -> LedgerResult<Option<ExecutionRecord>>;
    async fn get_by_key(
        &self,
        job_id: &str,
        scheduled_at: DateTime<Utc>,
    ) -> LedgerResult<Option<ExecutionRecord>>;
    async fn list(&self, filter: &ExecutionFilter) -> LedgerResult<Vec<ExecutionRecord>>;
    /// 指定作业已完成执行的平均耗时(秒)
    async fn average_duration(&self, job_id: &str) -> LedgerResult<Option<f64>>;
    /// 删除scheduled_at早于now - max_age_seconds的记录, 返回删除条数
    async fn delete_older_than(&self, max_age_seconds: i64) -> LedgerResult<u64>;
}
