use std::sync::Arc;

use jobledger_core::config::CleanupConfig;
use jobledger_core::LedgerResult;
use jobledger_domain::repositories::ExecutionRepository;
use tokio::time::interval;
use tracing::{error, info, warn};

/// 执行记录保留清理服务
///
/// 按固定间隔删除超过保留时长的执行记录，防止历史表无限增长。
pub struct CleanupService {
    execution_repository: Arc<dyn ExecutionRepository>,
    config: CleanupConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    cleanup_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CleanupService {
    pub fn new(execution_repository: Arc<dyn ExecutionRepository>, config: CleanupConfig) -> Self {
        Self {
            execution_repository,
            config,
            shutdown_tx: None,
            cleanup_handle: None,
        }
    }

    /// 启动后台清理循环
    pub fn start(&mut self) {
        if !self.config.enabled {
            info!("Cleanup service is disabled");
            return;
        }

        info!("Starting cleanup service with config: {:?}", self.config);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let execution_repository = self.execution_repository.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut cleanup_interval =
                interval(std::time::Duration::from_secs(config.interval_seconds));

            loop {
                tokio::select! {
                    _ = cleanup_interval.tick() => {
                        match execution_repository
                            .delete_older_than(config.max_age_seconds)
                            .await
                        {
                            Ok(deleted) if deleted > 0 => {
                                info!("Cleanup removed {} stale execution records", deleted);
                            }
                            Ok(_) => {}
                            Err(e) => error!("Cleanup failed: {}", e),
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Cleanup service shutdown requested");
                        break;
                    }
                }
            }

            info!("Cleanup service stopped");
        });

        self.cleanup_handle = Some(handle);
    }

    /// 停止后台清理循环
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.cleanup_handle.take() {
            if let Err(e) = handle.await {
                warn!("Error waiting for cleanup service to stop: {}", e);
            }
        }
    }

    /// 执行一次清理, 返回删除条数
    pub async fn cleanup_once(&self) -> LedgerResult<CleanupStats> {
        let started = std::time::Instant::now();
        let deleted = self
            .execution_repository
            .delete_older_than(self.config.max_age_seconds)
            .await?;

        Ok(CleanupStats {
            deleted,
            duration: started.elapsed(),
        })
    }
}

/// 清理统计信息
#[derive(Debug, Default)]
pub struct CleanupStats {
    pub deleted: u64,
    pub duration: std::time::Duration,
}

impl CleanupStats {
    pub fn has_cleanup(&self) -> bool {
        self.deleted > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_stats_default() {
        let stats = CleanupStats::default();
        assert_eq!(stats.deleted, 0);
        assert!(!stats.has_cleanup());
    }
}
