use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use jobledger_core::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};

/// 将时间戳截断到毫秒精度
///
/// 写入与对账使用同一种规范化表示, 保证往返读取后的scheduled_at仍能
/// 与内存中的键严格相等。
pub fn canonical_time(ts: DateTime<Utc>) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ts.timestamp_millis()) {
        chrono::LocalResult::Single(t) => t,
        _ => ts,
    }
}

/// 作业触发器描述
///
/// 只承载外部调度器的触发配置, 不做任何触发/日历运算。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    Cron { expr: String },
    Interval { seconds: u64 },
}

impl TriggerSpec {
    pub fn validate(&self) -> LedgerResult<()> {
        match self {
            TriggerSpec::Cron { expr } => {
                cron::Schedule::from_str(expr).map_err(|e| {
                    LedgerError::invalid_params(format!("无效的CRON表达式 '{expr}': {e}"))
                })?;
                Ok(())
            }
            TriggerSpec::Interval { seconds } => {
                if *seconds == 0 {
                    return Err(LedgerError::invalid_params("间隔触发器的间隔必须大于0秒"));
                }
                Ok(())
            }
        }
    }
}

/// 作业定义
///
/// 整个文档序列化为不透明的状态blob落库; 新增字段通过serde默认值保持
/// 向后兼容。`next_run_time`为None表示作业已暂停。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub task_name: String,
    #[serde(default = "default_args")]
    pub args: serde_json::Value,
    #[serde(default = "default_kwargs")]
    pub kwargs: serde_json::Value,
    #[serde(default)]
    pub trigger: Option<TriggerSpec>,
    #[serde(default)]
    pub misfire_grace_seconds: Option<u32>,
    #[serde(default = "default_coalesce")]
    pub coalesce: bool,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
    #[serde(default)]
    pub next_run_time: Option<DateTime<Utc>>,
}

fn default_args() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

fn default_kwargs() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_coalesce() -> bool {
    true
}

fn default_max_instances() -> u32 {
    1
}

impl Job {
    pub fn new<S: Into<String>, T: Into<String>>(id: S, task_name: T) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            task_name: task_name.into(),
            args: default_args(),
            kwargs: default_kwargs(),
            trigger: None,
            misfire_grace_seconds: None,
            coalesce: default_coalesce(),
            max_instances: default_max_instances(),
            next_run_time: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.next_run_time.is_none()
    }

    /// 序列化为不透明状态blob
    pub fn to_state_blob(&self) -> LedgerResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(LedgerError::from)
    }

    /// 从状态blob恢复; 损坏的blob映射为CorruptJobState
    pub fn from_state_blob(id: &str, blob: &[u8]) -> LedgerResult<Job> {
        serde_json::from_slice(blob)
            .map_err(|e| LedgerError::corrupt_job_state(id, e.to_string()))
    }

    pub fn entity_description(&self) -> String {
        match self.next_run_time {
            Some(next) => format!("作业 '{}' (下次运行: {})", self.id, next),
            None => format!("作业 '{}' (暂停中)", self.id),
        }
    }
}

/// 执行记录状态
///
/// 数据库取值沿用调度历史表既有的字符串词汇。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[serde(rename = "SENT")]
    Submitted,
    #[serde(rename = "SUCCESS")]
    Succeeded,
    #[serde(rename = "MISSED")]
    Missed,
    #[serde(rename = "MAX_INSTANCES")]
    MaxInstancesBlocked,
    #[serde(rename = "ERROR")]
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Submitted => "SENT",
            ExecutionStatus::Succeeded => "SUCCESS",
            ExecutionStatus::Missed => "MISSED",
            ExecutionStatus::MaxInstancesBlocked => "MAX_INSTANCES",
            ExecutionStatus::Error => "ERROR",
        }
    }

    /// 除Submitted之外的状态均为终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Submitted)
    }
}

impl sqlx::Type<sqlx::Sqlite> for ExecutionStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ExecutionStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "SENT" => Ok(ExecutionStatus::Submitted),
            "SUCCESS" => Ok(ExecutionStatus::Succeeded),
            "MISSED" => Ok(ExecutionStatus::Missed),
            "MAX_INSTANCES" => Ok(ExecutionStatus::MaxInstancesBlocked),
            "ERROR" => Ok(ExecutionStatus::Error),
            _ => Err(format!("Invalid execution status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ExecutionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 执行记录: 一次计划触发(作业id + 计划运行时间)的持久化结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub job_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub duration_seconds: Option<f64>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
}

impl ExecutionRecord {
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn entity_description(&self) -> String {
        format!(
            "执行记录 (ID: {}, 作业: {}, 状态: {})",
            self.id,
            self.job_id,
            self.status.as_str()
        )
    }
}

/// 执行记录查询过滤器
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub job_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub scheduled_from: Option<DateTime<Utc>>,
    pub scheduled_until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}
