use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;
use jobledger_core::LedgerResult;
use jobledger_domain::entities::{canonical_time, Job};
use jobledger_domain::events::SchedulerEvent;
use jobledger_domain::repositories::JobStore;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::registry::TaskRegistry;

/// 临时调度器
///
/// 短生命周期的内存调度器, 只负责把无触发器的作业立刻执行一次并广播
/// 生命周期事件; 不做任何触发/日历运算。"立即执行"批量操作为每个批次
/// 创建一个独立实例。
pub struct ImmediateScheduler {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn JobStore>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    running: Arc<Mutex<HashMap<String, u32>>>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ImmediateScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        store: Arc<dyn JobStore>,
        event_capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity);
        Self {
            registry,
            store,
            event_tx,
            running: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 订阅本调度器的生命周期事件
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    /// 提交作业并立即执行一次
    ///
    /// 计划运行时间取作业自带的next_run_time, 缺省为当前时刻。依次检查
    /// 错过宽限期与max_instances上限, 未通过时只发出对应事件而不执行。
    pub async fn submit(&self, job: Job) -> LedgerResult<()> {
        let now = canonical_time(Utc::now());
        let scheduled_at = job.next_run_time.map(canonical_time).unwrap_or(now);

        let mut stored = job.clone();
        stored.next_run_time = Some(scheduled_at);
        self.store.add_job(&stored).await?;

        let _ = self
            .event_tx
            .send(SchedulerEvent::submitted(&job.id, scheduled_at));

        if let Some(grace) = job.misfire_grace_seconds {
            if now - scheduled_at > Duration::seconds(i64::from(grace)) {
                warn!(
                    "作业 {} 超过错过宽限期 {}秒, 本次触发按错过处理",
                    job.id, grace
                );
                let _ = self
                    .event_tx
                    .send(SchedulerEvent::missed(&job.id, scheduled_at));
                return Ok(());
            }
        }

        {
            let mut running = self.running.lock().await;
            let count = running.entry(job.id.clone()).or_insert(0);
            if *count >= job.max_instances {
                warn!(
                    "作业 {} 已有 {} 个实例在运行, 达到上限, 本次触发被阻塞",
                    job.id, count
                );
                let _ = self
                    .event_tx
                    .send(SchedulerEvent::max_instances_blocked(&job.id, scheduled_at));
                return Ok(());
            }
            *count += 1;
        }

        let task = match self.registry.resolve(&job.task_name) {
            Ok(task) => task,
            Err(e) => {
                self.release_slot(&job.id).await;
                let _ = self.event_tx.send(SchedulerEvent::error(
                    &job.id,
                    scheduled_at,
                    e.to_string(),
                    None,
                ));
                return Ok(());
            }
        };

        let event_tx = self.event_tx.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            debug!("开始执行作业 {} (计划时间 {})", job.id, scheduled_at);
            let result = task.run(job.args.clone(), job.kwargs.clone()).await;

            {
                let mut running = running.lock().await;
                if let Some(count) = running.get_mut(&job.id) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        running.remove(&job.id);
                    }
                }
            }

            let event = match result {
                Ok(()) => SchedulerEvent::executed(&job.id, scheduled_at),
                Err(e) => SchedulerEvent::error(
                    &job.id,
                    scheduled_at,
                    e.to_string(),
                    Some(format!("{e:?}")),
                ),
            };
            let _ = event_tx.send(event);
        });

        self.handles.lock().await.push(handle);
        Ok(())
    }

    async fn release_slot(&self, job_id: &str) {
        let mut running = self.running.lock().await;
        if let Some(count) = running.get_mut(job_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                running.remove(job_id);
            }
        }
    }

    /// 关闭调度器
    ///
    /// wait为true时等待所有在途执行结束(优雅关闭); 为false时直接中止
    /// 在途执行(超时后的尽力而为式放弃, 无法保证回调真正停止)。
    pub async fn shutdown(&self, wait: bool) {
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        if wait {
            join_all(handles).await;
        } else {
            for handle in handles {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobledger_domain::events::SchedulerEventKind;
    use jobledger_infrastructure::MemoryJobStore;

    fn sleeper_registry(sleep_ms: u64) -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry
            .register_fn("tasks.sleep", None, move |_args, _kwargs| async move {
                tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
                Ok(())
            })
            .expect("register");
        registry
            .register_fn("tasks.fail", None, |_args, _kwargs| async {
                anyhow::bail!("boom")
            })
            .expect("register");
        Arc::new(registry)
    }

    async fn collect_events(
        rx: &mut broadcast::Receiver<SchedulerEvent>,
        count: usize,
    ) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        for _ in 0..count {
            let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
                .await
                .expect("event should arrive")
                .expect("channel open");
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_submit_emits_submitted_then_executed() {
        let scheduler = ImmediateScheduler::new(
            sleeper_registry(1),
            Arc::new(MemoryJobStore::new()),
            16,
        );
        let mut rx = scheduler.subscribe();

        scheduler
            .submit(Job::new("j1", "tasks.sleep"))
            .await
            .expect("submit");

        let events = collect_events(&mut rx, 2).await;
        assert_eq!(events[0].kind, SchedulerEventKind::Submitted);
        assert_eq!(events[1].kind, SchedulerEventKind::Executed);
        assert_eq!(events[1].job_id, "j1");
        assert_eq!(events[1].scheduled_at, events[0].scheduled_at);

        scheduler.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_failing_task_emits_error_event() {
        let scheduler = ImmediateScheduler::new(
            sleeper_registry(1),
            Arc::new(MemoryJobStore::new()),
            16,
        );
        let mut rx = scheduler.subscribe();

        scheduler
            .submit(Job::new("j1", "tasks.fail"))
            .await
            .expect("submit");

        let events = collect_events(&mut rx, 2).await;
        assert_eq!(events[1].kind, SchedulerEventKind::Error);
        assert_eq!(events[1].error_message.as_deref(), Some("boom"));
        assert!(events[1].error_trace.is_some());

        scheduler.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_unknown_task_emits_error_event() {
        let scheduler = ImmediateScheduler::new(
            sleeper_registry(1),
            Arc::new(MemoryJobStore::new()),
            16,
        );
        let mut rx = scheduler.subscribe();

        scheduler
            .submit(Job::new("j1", "tasks.unknown"))
            .await
            .expect("submit");

        let events = collect_events(&mut rx, 2).await;
        assert_eq!(events[1].kind, SchedulerEventKind::Error);

        scheduler.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_stale_submission_is_missed() {
        let scheduler = ImmediateScheduler::new(
            sleeper_registry(1),
            Arc::new(MemoryJobStore::new()),
            16,
        );
        let mut rx = scheduler.subscribe();

        let mut job = Job::new("j1", "tasks.sleep");
        job.misfire_grace_seconds = Some(30);
        job.next_run_time = Some(Utc::now() - Duration::minutes(10));
        scheduler.submit(job).await.expect("submit");

        let events = collect_events(&mut rx, 2).await;
        assert_eq!(events[1].kind, SchedulerEventKind::Missed);

        scheduler.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_max_instances_blocks_second_submission() {
        let scheduler = ImmediateScheduler::new(
            sleeper_registry(500),
            Arc::new(MemoryJobStore::new()),
            16,
        );
        let mut rx = scheduler.subscribe();

        let job = Job::new("j1", "tasks.sleep");
        scheduler.submit(job.clone()).await.expect("submit");
        scheduler.submit(job).await.expect("submit");

        // 第一次: Submitted; 第二次: Submitted + MaxInstancesBlocked
        let events = collect_events(&mut rx, 3).await;
        assert_eq!(events[2].kind, SchedulerEventKind::MaxInstancesBlocked);

        scheduler.shutdown(false).await;
    }
}
