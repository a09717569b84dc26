use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use jobledger_core::{LedgerError, LedgerResult};

/// 可调度的任务回调
#[async_trait]
pub trait JobTask: Send + Sync {
    async fn run(
        &self,
        args: serde_json::Value,
        kwargs: serde_json::Value,
    ) -> anyhow::Result<()>;
}

struct FnTask<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobTask for FnTask<F>
where
    F: Fn(serde_json::Value, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(
        &self,
        args: serde_json::Value,
        kwargs: serde_json::Value,
    ) -> anyhow::Result<()> {
        (self.f)(args, kwargs).await
    }
}

#[derive(Clone)]
pub struct RegisteredTask {
    pub name: String,
    pub description: String,
    pub task: Arc<dyn JobTask>,
}

/// 进程级任务注册表
///
/// 启动阶段由各组件显式注册, 之后以Arc共享只读访问; 无同步并发读
/// 是安全的。
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册任务; 描述缺省为任务名, 重名注册失败
    pub fn register(
        &mut self,
        name: &str,
        description: Option<&str>,
        task: Arc<dyn JobTask>,
    ) -> LedgerResult<()> {
        if self.tasks.contains_key(name) {
            return Err(LedgerError::duplicate_task(name));
        }
        self.tasks.insert(
            name.to_string(),
            RegisteredTask {
                name: name.to_string(),
                description: description.unwrap_or(name).to_string(),
                task,
            },
        );
        Ok(())
    }

    /// 以异步闭包形式注册任务
    pub fn register_fn<F, Fut>(
        &mut self,
        name: &str,
        description: Option<&str>,
        f: F,
    ) -> LedgerResult<()>
    where
        F: Fn(serde_json::Value, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(name, description, Arc::new(FnTask { f }))
    }

    pub fn resolve(&self, name: &str) -> LedgerResult<Arc<dyn JobTask>> {
        self.tasks
            .get(name)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| LedgerError::task_not_found(name))
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTask> {
        self.tasks.get(name)
    }

    /// 按名称排序的注册任务列表
    pub fn tasks(&self) -> Vec<&RegisteredTask> {
        let mut entries: Vec<&RegisteredTask> = self.tasks.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
