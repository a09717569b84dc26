//! 调度器生命周期事件
//!
//! 主调度器与临时调度器通过同一事件类型向对账层投递执行结果。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::ExecutionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerEventKind {
    Submitted,
    Executed,
    Missed,
    MaxInstancesBlocked,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerEvent {
    pub id: Uuid,
    pub kind: SchedulerEventKind,
    pub job_id: String,
    /// 本次触发的计划运行时间, 与job_id共同标识一次触发
    pub scheduled_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
}

impl SchedulerEvent {
    fn new(kind: SchedulerEventKind, job_id: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            job_id: job_id.to_string(),
            scheduled_at,
            occurred_at: Utc::now(),
            error_message: None,
            error_trace: None,
        }
    }

    pub fn submitted(job_id: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self::new(SchedulerEventKind::Submitted, job_id, scheduled_at)
    }

    pub fn executed(job_id: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self::new(SchedulerEventKind::Executed, job_id, scheduled_at)
    }

    pub fn missed(job_id: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self::new(SchedulerEventKind::Missed, job_id, scheduled_at)
    }

    pub fn max_instances_blocked(job_id: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self::new(SchedulerEventKind::MaxInstancesBlocked, job_id, scheduled_at)
    }

    pub fn error(
        job_id: &str,
        scheduled_at: DateTime<Utc>,
        message: String,
        trace: Option<String>,
    ) -> Self {
        let mut event = Self::new(SchedulerEventKind::Error, job_id, scheduled_at);
        event.error_message = Some(message);
        event.error_trace = trace;
        event
    }

    /// 事件对应的执行记录状态
    pub fn record_status(&self) -> ExecutionStatus {
        match self.kind {
            SchedulerEventKind::Submitted => ExecutionStatus::Submitted,
            SchedulerEventKind::Executed => ExecutionStatus::Succeeded,
            SchedulerEventKind::Missed => ExecutionStatus::Missed,
            SchedulerEventKind::MaxInstancesBlocked => ExecutionStatus::MaxInstancesBlocked,
            SchedulerEventKind::Error => ExecutionStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_status_mapping() {
        let t = Utc::now();
        assert_eq!(
            SchedulerEvent::submitted("j1", t).record_status(),
            ExecutionStatus::Submitted
        );
        assert_eq!(
            SchedulerEvent::executed("j1", t).record_status(),
            ExecutionStatus::Succeeded
        );
        assert_eq!(
            SchedulerEvent::error("j1", t, "boom".into(), None).record_status(),
            ExecutionStatus::Error
        );
    }

    #[test]
    fn test_error_event_carries_detail() {
        let event = SchedulerEvent::error(
            "j1",
            Utc::now(),
            "任务失败".into(),
            Some("trace".into()),
        );
        assert_eq!(event.error_message.as_deref(), Some("任务失败"));
        assert_eq!(event.error_trace.as_deref(), Some("trace"));
    }
}
