use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jobledger_core::{AppConfig, RetryPolicy};
use jobledger_domain::entities::ExecutionFilter;
use jobledger_domain::repositories::{ExecutionRepository, JobStore};
use jobledger_infrastructure::{
    create_sqlite_pool, CleanupService, SqliteExecutionRepository, SqliteJobStore,
};
use jobledger_runtime::{EventBridge, ExecutionReconciler, RunNowService, TaskRegistry};
use tokio::sync::{broadcast, Mutex};
use tracing::info;

/// 主应用程序
///
/// 持有配置、存储与对账组件, 为CLI各子命令提供统一的装配入口。
pub struct Application {
    config: AppConfig,
    job_store: Arc<dyn JobStore>,
    execution_repository: Arc<dyn ExecutionRepository>,
    registry: Arc<TaskRegistry>,
    reconciler: Arc<ExecutionReconciler>,
    /// 调度器集成层的命名锁, 注入对账器以串行化事件落库
    scheduler_lock: Arc<Mutex<()>>,
    event_tx: broadcast::Sender<jobledger_domain::SchedulerEvent>,
}

impl Application {
    /// 创建应用实例: 连接数据库并装配各组件
    pub async fn new(config: AppConfig, registry: TaskRegistry) -> Result<Self> {
        info!("连接数据库: {}", config.database.url);
        let pool = create_sqlite_pool(&config.database)
            .await
            .context("初始化数据库失败")?;

        let job_store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(pool.clone()));
        let execution_repository: Arc<dyn ExecutionRepository> =
            Arc::new(SqliteExecutionRepository::new(pool.clone()));

        let scheduler_lock = Arc::new(Mutex::new(()));
        let retry = RetryPolicy::new(
            config.scheduler.reconcile_max_retries,
            Duration::from_millis(config.scheduler.reconcile_retry_base_ms),
            Duration::from_millis(config.scheduler.reconcile_retry_max_ms),
        );
        let reconciler = Arc::new(ExecutionReconciler::new(
            execution_repository.clone(),
            scheduler_lock.clone(),
            retry,
        ));

        let (event_tx, _) = broadcast::channel(config.scheduler.event_channel_capacity);

        Ok(Self {
            config,
            job_store,
            execution_repository,
            registry: Arc::new(registry),
            reconciler,
            scheduler_lock,
            event_tx,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn job_store(&self) -> Arc<dyn JobStore> {
        self.job_store.clone()
    }

    pub fn execution_repository(&self) -> Arc<dyn ExecutionRepository> {
        self.execution_repository.clone()
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        self.registry.clone()
    }

    pub fn scheduler_lock(&self) -> Arc<Mutex<()>> {
        self.scheduler_lock.clone()
    }

    /// 主调度器集成用的事件发送端
    pub fn event_sender(&self) -> broadcast::Sender<jobledger_domain::SchedulerEvent> {
        self.event_tx.clone()
    }

    pub fn run_now_service(&self) -> RunNowService {
        RunNowService::new(
            self.job_store.clone(),
            self.registry.clone(),
            self.reconciler.clone(),
            &self.config.scheduler,
        )
    }

    /// 常驻模式: 启动事件桥与保留清理服务, 直到收到Ctrl-C
    pub async fn serve(&self) -> Result<()> {
        let mut bridge = EventBridge::new(self.reconciler.clone());
        bridge.start(self.event_tx.subscribe());

        let mut cleanup =
            CleanupService::new(self.execution_repository.clone(), self.config.cleanup.clone());
        cleanup.start();

        info!("事件桥与清理服务已启动, 等待调度器事件 (Ctrl-C 退出)");
        tokio::signal::ctrl_c()
            .await
            .context("等待退出信号失败")?;

        info!("收到退出信号, 开始停止组件");
        cleanup.stop().await;
        bridge.stop().await;
        Ok(())
    }

    /// 一次性保留清理
    pub async fn cleanup_once(&self, max_age_seconds: Option<i64>) -> Result<u64> {
        let mut config = self.config.cleanup.clone();
        if let Some(max_age) = max_age_seconds {
            config.max_age_seconds = max_age;
        }
        let service = CleanupService::new(self.execution_repository.clone(), config);
        let stats = service.cleanup_once().await?;
        Ok(stats.deleted)
    }

    /// 作业一览: 定义 + 平均执行耗时
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let jobs = self.job_store.get_all_jobs().await?;
        let mut summaries = Vec::with_capacity(jobs.len());
        for job in jobs {
            let average_duration = self.execution_repository.average_duration(&job.id).await?;
            summaries.push(JobSummary {
                average_duration,
                job,
            });
        }
        Ok(summaries)
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<jobledger_domain::ExecutionRecord>> {
        Ok(self.execution_repository.list(filter).await?)
    }
}

/// 作业及其历史平均耗时
pub struct JobSummary {
    pub job: jobledger_domain::Job,
    pub average_duration: Option<f64>,
}
