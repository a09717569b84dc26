use std::sync::Arc;

use jobledger_domain::events::SchedulerEvent;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::reconciler::ExecutionReconciler;

/// 事件桥
///
/// 消费调度器事件通道并逐条交给对账器落库。面向调度器事件分发的边界:
/// 单条事件对账失败只记录日志, 绝不让事件线程死掉。
pub struct EventBridge {
    reconciler: Arc<ExecutionReconciler>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl EventBridge {
    pub fn new(reconciler: Arc<ExecutionReconciler>) -> Self {
        Self {
            reconciler,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// 启动事件消费循环
    pub fn start(&mut self, mut events: broadcast::Receiver<SchedulerEvent>) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let reconciler = self.reconciler.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => Self::record(&reconciler, event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("事件通道积压, 丢弃了 {} 条事件", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("事件通道已关闭, 事件桥退出");
                            break;
                        }
                    },
                    _ = &mut shutdown_rx => {
                        // 停止前排空已入队的事件, 保证完成事件不丢
                        loop {
                            match events.try_recv() {
                                Ok(event) => Self::record(&reconciler, event).await,
                                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                                    warn!("事件通道积压, 丢弃了 {} 条事件", skipped);
                                }
                                Err(_) => break,
                            }
                        }
                        info!("事件桥收到停止信号");
                        break;
                    }
                }
            }
        });

        self.handle = Some(handle);
    }

    async fn record(reconciler: &ExecutionReconciler, event: SchedulerEvent) {
        if let Err(e) = reconciler.record_event(&event).await {
            // 对账失败不能影响调度器事件分发线程
            error!(
                "记录调度事件失败: 作业 {} (kind={:?}): {}",
                event.job_id, event.kind, e
            );
        }
    }

    /// 停止消费循环, 等待在途事件处理完毕
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("等待事件桥退出时出错: {}", e);
            }
        }
    }
}
