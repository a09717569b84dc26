use std::sync::Arc;

use chrono::Utc;
use jobledger_core::{LedgerResult, RetryPolicy};
use jobledger_domain::entities::{canonical_time, ExecutionRecord};
use jobledger_domain::events::SchedulerEvent;
use jobledger_domain::repositories::{ExecutionChange, ExecutionRepository};
use tokio::sync::Mutex;
use tracing::instrument;

/// 执行记录对账器
///
/// 把调度器生命周期事件转换为持久化执行记录。持有调度器集成层注入的
/// 命名互斥锁: 同一进程内任一时刻至多一次对账在途, 与存储事务一起保证
/// 每个(job_id, scheduled_at)至多一个写入者。
pub struct ExecutionReconciler {
    execution_repository: Arc<dyn ExecutionRepository>,
    lock: Arc<Mutex<()>>,
    retry: RetryPolicy,
}

impl ExecutionReconciler {
    pub fn new(
        execution_repository: Arc<dyn ExecutionRepository>,
        lock: Arc<Mutex<()>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            execution_repository,
            lock,
            retry,
        }
    }

    /// 将一个调度事件落为执行记录, 返回落库后的记录
    ///
    /// 终态事件写入duration与finished_at; 提交事件新建记录时两者留空,
    /// 命中已有记录时被丢弃(事件可能乱序到达)。瞬时存储错误按退避策略
    /// 重试, 预算耗尽后错误上抛由调用方处置。
    #[instrument(skip(self, event), fields(job_id = %event.job_id, kind = ?event.kind))]
    pub async fn record_event(&self, event: &SchedulerEvent) -> LedgerResult<ExecutionRecord> {
        let _guard = self.lock.lock().await;

        let scheduled_at = canonical_time(event.scheduled_at);
        let now = canonical_time(Utc::now());
        let status = event.record_status();

        let change = if status.is_terminal() {
            let duration_seconds =
                (now - scheduled_at).num_milliseconds() as f64 / 1000.0;
            ExecutionChange {
                job_id: event.job_id.clone(),
                scheduled_at,
                status,
                duration_seconds: Some(duration_seconds),
                finished_at: Some(now),
                error_message: event.error_message.clone(),
                error_trace: event.error_trace.clone(),
            }
        } else {
            // 提交事件: 在终态事件到达之前duration没有意义
            ExecutionChange {
                job_id: event.job_id.clone(),
                scheduled_at,
                status,
                duration_seconds: None,
                finished_at: None,
                error_message: None,
                error_trace: None,
            }
        };

        let repository = self.execution_repository.clone();
        self.retry
            .run("reconcile_execution", || {
                let repository = repository.clone();
                let change = change.clone();
                async move { repository.reconcile(&change).await }
            })
            .await
    }
}
