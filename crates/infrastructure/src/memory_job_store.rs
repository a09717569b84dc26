use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobledger_core::{LedgerError, LedgerResult};
use jobledger_domain::entities::{canonical_time, Job};
use jobledger_domain::repositories::JobStore;
use tokio::sync::RwLock;

/// 内存作业存储
///
/// 仅为"立即执行"的临时调度器提供存储, 与持久化存储互不共享数据,
/// 进程结束即消失。
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn add_job(&self, job: &Job) -> LedgerResult<()> {
        if let Some(trigger) = &job.trigger {
            trigger.validate()?;
        }
        let mut normalized = job.clone();
        normalized.next_run_time = normalized.next_run_time.map(canonical_time);
        self.jobs
            .write()
            .await
            .insert(normalized.id.clone(), normalized);
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> LedgerResult<()> {
        self.add_job(job).await
    }

    async fn remove_job(&self, id: &str) -> LedgerResult<()> {
        if self.jobs.write().await.remove(id).is_none() {
            return Err(LedgerError::job_not_found(id));
        }
        Ok(())
    }

    async fn lookup_job(&self, id: &str) -> LedgerResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn get_all_jobs(&self) -> LedgerResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        // 暂停作业(next_run_time为None)排在末尾
        jobs.sort_by_key(|job| (job.next_run_time.is_none(), job.next_run_time));
        Ok(jobs)
    }

    async fn get_due_jobs(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Job>> {
        let cutoff = canonical_time(cutoff);
        let mut due: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| matches!(job.next_run_time, Some(next) if next <= cutoff))
            .cloned()
            .collect();
        due.sort_by_key(|job| job.next_run_time);
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_round_trip_and_removal() {
        let store = MemoryJobStore::new();
        let mut job = Job::new("j1", "tasks.noop");
        job.next_run_time = Some(Utc::now());

        store.add_job(&job).await.expect("add");
        let found = store.lookup_job("j1").await.expect("lookup");
        assert_eq!(found.map(|j| j.id), Some("j1".to_string()));

        store.remove_job("j1").await.expect("remove");
        assert!(store.lookup_job("j1").await.expect("lookup").is_none());
        assert!(matches!(
            store.remove_job("j1").await,
            Err(LedgerError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_due_jobs_and_ordering() {
        let store = MemoryJobStore::new();
        let now = canonical_time(Utc::now());

        let mut early = Job::new("early", "tasks.noop");
        early.next_run_time = Some(now - Duration::minutes(5));
        let mut late = Job::new("late", "tasks.noop");
        late.next_run_time = Some(now + Duration::minutes(5));
        let paused = Job::new("paused", "tasks.noop");

        store.add_job(&late).await.expect("add");
        store.add_job(&early).await.expect("add");
        store.add_job(&paused).await.expect("add");

        let due = store.get_due_jobs(now).await.expect("due");
        assert_eq!(
            due.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
            vec!["early"]
        );

        let all = store.get_all_jobs().await.expect("all");
        assert_eq!(
            all.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
            vec!["early", "late", "paused"]
        );
    }

    #[tokio::test]
    async fn test_stores_do_not_share_state() {
        let durable = MemoryJobStore::new();
        let transient = MemoryJobStore::new();
        durable
            .add_job(&Job::new("j1", "tasks.noop"))
            .await
            .expect("add");
        assert!(transient.lookup_job("j1").await.expect("lookup").is_none());
    }
}
