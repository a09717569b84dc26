use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub cleanup: CleanupConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// "立即执行"批量操作的同步等待上限（秒）
    pub run_now_timeout_seconds: u64,
    /// 调度器生命周期事件通道容量
    pub event_channel_capacity: usize,
    /// 对账操作的瞬时错误重试次数
    pub reconcile_max_retries: u32,
    /// 重试退避基础间隔（毫秒）
    pub reconcile_retry_base_ms: u64,
    /// 重试退避间隔上限（毫秒）
    pub reconcile_retry_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    pub enabled: bool,
    /// 清理间隔（秒）
    pub interval_seconds: u64,
    /// 执行记录保留时长（秒），早于该时长的记录被删除
    pub max_age_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:jobledger.db".to_string(),
                max_connections: 5,
                min_connections: 1,
                connection_timeout_seconds: 30,
            },
            scheduler: SchedulerConfig {
                run_now_timeout_seconds: 15,
                event_channel_capacity: 256,
                reconcile_max_retries: 3,
                reconcile_retry_base_ms: 100,
                reconcile_retry_max_ms: 2000,
            },
            cleanup: CleanupConfig {
                enabled: true,
                interval_seconds: 3600,
                max_age_seconds: 7 * 24 * 3600,
            },
            log: LogConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 加载应用配置: 默认值 <- 可选TOML文件 <- JOBLEDGER_*环境变量
    pub fn load(config_path: Option<&str>) -> LedgerResult<Self> {
        let mut builder = ConfigBuilder::builder()
            .set_default("database.url", "sqlite:jobledger.db")
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("database.max_connections", 5)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("database.min_connections", 1)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("database.connection_timeout_seconds", 30)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("scheduler.run_now_timeout_seconds", 15)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("scheduler.event_channel_capacity", 256)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("scheduler.reconcile_max_retries", 3)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("scheduler.reconcile_retry_base_ms", 100)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("scheduler.reconcile_retry_max_ms", 2000)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("cleanup.enabled", true)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("cleanup.interval_seconds", 3600)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("cleanup.max_age_seconds", 7 * 24 * 3600)
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .set_default("log.level", "info")
            .map_err(|e| LedgerError::Configuration(e.to_string()))?;

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(LedgerError::Configuration(format!(
                    "配置文件不存在: {path}"
                )));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/jobledger.toml", "jobledger.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let config: AppConfig = builder
            .add_source(Environment::with_prefix("JOBLEDGER").separator("__"))
            .build()
            .map_err(|e| LedgerError::Configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| LedgerError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.database.url.is_empty() {
            return Err(LedgerError::config_error("database.url 不能为空"));
        }
        if self.database.max_connections == 0 {
            return Err(LedgerError::config_error(
                "database.max_connections 必须大于0",
            ));
        }
        if self.scheduler.run_now_timeout_seconds == 0 {
            return Err(LedgerError::config_error(
                "scheduler.run_now_timeout_seconds 必须大于0",
            ));
        }
        if self.scheduler.event_channel_capacity == 0 {
            return Err(LedgerError::config_error(
                "scheduler.event_channel_capacity 必须大于0",
            ));
        }
        if self.cleanup.max_age_seconds < 0 {
            return Err(LedgerError::config_error(
                "cleanup.max_age_seconds 不能为负数",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.run_now_timeout_seconds, 15);
        assert_eq!(config.database.url, "sqlite:jobledger.db");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = AppConfig::load(None).expect("defaults should load");
        assert_eq!(config.scheduler.reconcile_max_retries, 3);
        assert_eq!(config.cleanup.max_age_seconds, 7 * 24 * 3600);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").expect("temp file");
        writeln!(
            file,
            "[scheduler]\nrun_now_timeout_seconds = 3\n\n[database]\nurl = \"sqlite::memory:\""
        )
        .expect("write config");

        let config =
            AppConfig::load(Some(file.path().to_str().expect("utf-8 path"))).expect("load");
        assert_eq!(config.scheduler.run_now_timeout_seconds, 3);
        assert_eq!(config.database.url, "sqlite::memory:");
        // 未覆盖的键保持默认值
        assert_eq!(config.cleanup.interval_seconds, 3600);
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let result = AppConfig::load(Some("/nonexistent/jobledger.toml"));
        assert!(matches!(result, Err(LedgerError::Configuration(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.run_now_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }
}
