use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobledger_core::AppConfig;
use jobledger_domain::entities::{ExecutionFilter, Job, TriggerSpec};
use jobledger_runtime::{RunNowOutcome, TaskRegistry};
use tracing::info;

use jobledger::app::Application;

#[derive(Parser)]
#[command(name = "jobledger", about = "调度器作业持久化与执行记录对账")]
struct Cli {
    /// 配置文件路径(TOML)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 常驻运行事件桥与保留清理服务
    Serve,
    /// 列出作业定义与平均执行耗时
    Jobs,
    /// 列出执行记录
    Executions {
        /// 只看指定作业
        #[arg(long)]
        job_id: Option<String>,
        /// 返回条数上限
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// 写入(upsert)一个作业定义
    AddJob {
        /// 作业id
        id: String,
        /// 注册表中的任务名
        #[arg(long)]
        task: String,
        /// CRON表达式触发器
        #[arg(long)]
        cron: Option<String>,
        /// 间隔触发器(秒)
        #[arg(long)]
        interval: Option<u64>,
        /// 位置参数(JSON数组)
        #[arg(long, default_value = "[]")]
        args: String,
        /// 关键字参数(JSON对象)
        #[arg(long, default_value = "{}")]
        kwargs: String,
    },
    /// 删除一个作业定义
    RemoveJob { id: String },
    /// 立即执行选中的作业并等待完成
    RunNow {
        /// 作业id列表
        ids: Vec<String>,
    },
    /// 清理过期执行记录
    Cleanup {
        /// 覆盖配置的保留时长(秒)
        #[arg(long)]
        max_age_seconds: Option<i64>,
    },
    /// 列出已注册的任务
    Tasks,
}

/// 构建进程级任务注册表
///
/// 各任务在此显式注册; 部署方接入时在这里挂上自己的任务回调。
fn build_registry() -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry.register_fn(
        "jobledger.echo",
        Some("把kwargs原样写进日志, 用于部署后的连通性检查"),
        |args, kwargs| async move {
            info!("echo: args={} kwargs={}", args, kwargs);
            Ok(())
        },
    )?;
    Ok(registry)
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    init_tracing(&config.log.level);

    let app = Application::new(config, build_registry()?).await?;

    match cli.command {
        Command::Serve => app.serve().await?,
        Command::Jobs => {
            for summary in app.list_jobs().await? {
                let next_run = summary
                    .job
                    .next_run_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "(暂停中)".to_string());
                let average = summary
                    .average_duration
                    .map(|d| format!("{d:.2}s"))
                    .unwrap_or_else(|| "无".to_string());
                println!(
                    "{}\t{}\t下次运行: {}\t平均耗时: {}",
                    summary.job.id, summary.job.task_name, next_run, average
                );
            }
        }
        Command::Executions { job_id, limit } => {
            let filter = ExecutionFilter {
                job_id,
                limit: Some(limit),
                ..Default::default()
            };
            for record in app.list_executions(&filter).await? {
                let duration = record
                    .duration_seconds
                    .map(|d| format!("{d:.2}s"))
                    .unwrap_or_else(|| "N/A".to_string());
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    record.id,
                    record.job_id,
                    record.status.as_str(),
                    record.scheduled_at.to_rfc3339(),
                    duration
                );
            }
        }
        Command::AddJob {
            id,
            task,
            cron,
            interval,
            args,
            kwargs,
        } => {
            let mut job = Job::new(id, task);
            job.args = serde_json::from_str(&args).context("args 必须是JSON数组")?;
            job.kwargs = serde_json::from_str(&kwargs).context("kwargs 必须是JSON对象")?;
            job.trigger = match (cron, interval) {
                (Some(expr), None) => Some(TriggerSpec::Cron { expr }),
                (None, Some(seconds)) => Some(TriggerSpec::Interval { seconds }),
                (None, None) => None,
                (Some(_), Some(_)) => {
                    anyhow::bail!("--cron 与 --interval 只能二选一");
                }
            };
            // next_run_time由接入的调度器维护; 新作业先以当前时刻入队
            job.next_run_time = Some(chrono::Utc::now());
            app.job_store().add_job(&job).await?;
            println!("作业 {} 已写入", job.id);
        }
        Command::RemoveJob { id } => {
            app.job_store().remove_job(&id).await?;
            println!("作业 {id} 已删除");
        }
        Command::RunNow { ids } => {
            if ids.is_empty() {
                anyhow::bail!("至少指定一个作业id");
            }
            let report = app.run_now_service().run_now(&ids).await?;
            for (job_id, outcome) in &report.outcomes {
                match outcome {
                    RunNowOutcome::Executed => println!("{job_id}: 已执行"),
                    RunNowOutcome::Skipped { reason } => {
                        println!("{job_id}: 跳过 ({reason})")
                    }
                    RunNowOutcome::TimedOut => println!("{job_id}: 超时未完成"),
                }
            }
            if let Some(err) = report.timeout_error() {
                return Err(err.into());
            }
        }
        Command::Cleanup { max_age_seconds } => {
            let deleted = app.cleanup_once(max_age_seconds).await?;
            println!("已清理 {deleted} 条执行记录");
        }
        Command::Tasks => {
            for task in app.registry().tasks() {
                println!("{}\t{}", task.name, task.description);
            }
        }
    }

    Ok(())
}
