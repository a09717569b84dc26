use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未注册: {name}")]
    TaskNotFound { name: String },
    #[error("任务重复注册: {name}")]
    DuplicateTask { name: String },
    #[error("作业不存在: id={id}")]
    JobNotFound { id: String },
    #[error("作业状态数据损坏: id={id} - {reason}")]
    CorruptJobState { id: String, reason: String },
    #[error("执行记录对账冲突: {0}")]
    ReconciliationConflict(String),
    #[error("立即执行超时, 挂起的作业: {pending:?}")]
    RunNowTimeout { pending: Vec<String> },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn task_not_found<S: Into<String>>(name: S) -> Self {
        Self::TaskNotFound { name: name.into() }
    }
    pub fn duplicate_task<S: Into<String>>(name: S) -> Self {
        Self::DuplicateTask { name: name.into() }
    }
    pub fn job_not_found<S: Into<String>>(id: S) -> Self {
        Self::JobNotFound { id: id.into() }
    }
    pub fn corrupt_job_state<S: Into<String>, R: Into<String>>(id: S, reason: R) -> Self {
        Self::CorruptJobState {
            id: id.into(),
            reason: reason.into(),
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::Internal(_) | LedgerError::Configuration(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Database(_)
                | LedgerError::DatabaseOperation(_)
                | LedgerError::ReconciliationConflict(_)
        )
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(err: anyhow::Error) -> Self {
        LedgerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LedgerError::ReconciliationConflict("busy".into()).is_retryable());
        assert!(LedgerError::database_error("locked").is_retryable());
        assert!(!LedgerError::job_not_found("j1").is_retryable());
        assert!(!LedgerError::RunNowTimeout { pending: vec![] }.is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(LedgerError::config_error("bad").is_fatal());
        assert!(!LedgerError::task_not_found("t").is_fatal());
    }
}
