use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use jobledger_core::config::SchedulerConfig;
use jobledger_core::{LedgerError, LedgerResult};
use jobledger_domain::events::SchedulerEventKind;
use jobledger_domain::repositories::JobStore;
use jobledger_infrastructure::MemoryJobStore;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

use crate::bridge::EventBridge;
use crate::reconciler::ExecutionReconciler;
use crate::registry::TaskRegistry;
use crate::scheduler::ImmediateScheduler;

/// 单个作业的"立即执行"结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunNowOutcome {
    Executed,
    Skipped { reason: String },
    TimedOut,
}

/// "立即执行"批量操作报告
#[derive(Debug)]
pub struct RunNowReport {
    pub outcomes: Vec<(String, RunNowOutcome)>,
}

impl RunNowReport {
    /// 超时未完成的作业id
    pub fn pending(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == RunNowOutcome::TimedOut)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn timed_out(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, outcome)| *outcome == RunNowOutcome::TimedOut)
    }

    /// 超时报告对应的错误值, 供需要以错误形式上抛的调用方使用
    pub fn timeout_error(&self) -> Option<LedgerError> {
        if self.timed_out() {
            Some(LedgerError::RunNowTimeout {
                pending: self.pending(),
            })
        } else {
            None
        }
    }
}

/// "立即执行"编排器
///
/// 管理员触发的同步操作: 从持久化存储取出选中的作业定义, 交给一个
/// 全新的临时调度器立即执行, 阻塞等待全部完成或超时。调用方需把它当作
/// 一次可能耗时到超时上限的同步调用。
pub struct RunNowService {
    durable_store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    reconciler: Arc<ExecutionReconciler>,
    timeout: Duration,
    event_capacity: usize,
}

impl RunNowService {
    pub fn new(
        durable_store: Arc<dyn JobStore>,
        registry: Arc<TaskRegistry>,
        reconciler: Arc<ExecutionReconciler>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            durable_store,
            registry,
            reconciler,
            timeout: Duration::from_secs(config.run_now_timeout_seconds),
            event_capacity: config.event_channel_capacity,
        }
    }

    /// 立即执行一批作业, 返回逐项结果
    ///
    /// 缺失或损坏的作业定义逐项降级为Skipped, 不中断整个批次; 超时是
    /// 尽力而为式放弃, 已在执行的回调无法被取消。
    pub async fn run_now(&self, job_ids: &[String]) -> LedgerResult<RunNowReport> {
        let scheduler = Arc::new(ImmediateScheduler::new(
            self.registry.clone(),
            Arc::new(MemoryJobStore::new()),
            self.event_capacity,
        ));

        // 临时调度器的事件同样进入对账层, 立即执行的历史也要留痕
        let mut bridge = EventBridge::new(self.reconciler.clone());
        bridge.start(scheduler.subscribe());

        // 只关注executed事件的隔离监听器, 通过Notify唤醒等待方
        let executed: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let completion = Arc::new(Notify::new());
        let listener = {
            let executed = executed.clone();
            let completion = completion.clone();
            let mut events = scheduler.subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) if event.kind == SchedulerEventKind::Executed => {
                            executed.lock().await.insert(event.job_id);
                            completion.notify_waiters();
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let mut skipped: Vec<(String, String)> = Vec::new();
        let mut submitted: HashSet<String> = HashSet::new();

        for job_id in job_ids {
            match self.durable_store.lookup_job(job_id).await {
                Ok(Some(mut job)) => {
                    // 无触发器提交: 立刻执行一次, 其余属性原样保留
                    job.trigger = None;
                    job.next_run_time = None;
                    scheduler.submit(job).await?;
                    submitted.insert(job_id.clone());
                }
                Ok(None) => {
                    warn!("无法在数据库找到作业 {} ! 跳过执行...", job_id);
                    skipped.push((job_id.clone(), "作业不存在".to_string()));
                }
                Err(e @ LedgerError::CorruptJobState { .. }) => {
                    warn!("作业 {} 的定义无法读取, 跳过执行: {}", job_id, e);
                    skipped.push((job_id.clone(), e.to_string()));
                }
                Err(e) => {
                    listener.abort();
                    scheduler.shutdown(false).await;
                    bridge.stop().await;
                    return Err(e);
                }
            }
        }

        let completed = self
            .wait_for_completion(&submitted, &executed, &completion)
            .await;

        listener.abort();
        if completed {
            scheduler.shutdown(true).await;
        } else {
            // 超时: 不等待在途作业, 直接拆除临时调度器
            scheduler.shutdown(false).await;
        }
        bridge.stop().await;

        let done = executed.lock().await;
        let mut outcomes = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if let Some((_, reason)) = skipped.iter().find(|(id, _)| id == job_id) {
                outcomes.push((
                    job_id.clone(),
                    RunNowOutcome::Skipped {
                        reason: reason.clone(),
                    },
                ));
            } else if done.contains(job_id) {
                info!("已执行的作业 '{}'!", job_id);
                outcomes.push((job_id.clone(), RunNowOutcome::Executed));
            } else {
                outcomes.push((job_id.clone(), RunNowOutcome::TimedOut));
            }
        }

        let report = RunNowReport { outcomes };
        if report.timed_out() {
            warn!(
                "最大运行时间超过 {} 秒! 并非所有作业都成功完成. 挂起的作业: {}",
                self.timeout.as_secs(),
                report.pending().join(",")
            );
        }
        Ok(report)
    }

    /// 等待全部已提交作业完成; 返回false表示超时
    async fn wait_for_completion(
        &self,
        submitted: &HashSet<String>,
        executed: &Arc<Mutex<HashSet<String>>>,
        completion: &Arc<Notify>,
    ) -> bool {
        if submitted.is_empty() {
            return true;
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            // 先注册唤醒再检查完成集, 避免错过通知
            let mut notified = pin!(completion.notified());
            notified.as_mut().enable();

            {
                let done = executed.lock().await;
                if submitted.is_subset(&done) {
                    return true;
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }
}
