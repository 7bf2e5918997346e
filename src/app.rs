use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use jobproc_config::AppConfig;
use jobproc_dispatcher::{
    AdminService, FallbackPackage, JobExecutionService, JobScheduler, MissedJobRecovery,
    ProcessorRegistry,
};
use jobproc_domain::{JobRepository, TriggerService};
use jobproc_infrastructure::{
    DatabaseManager, SqliteInputFileRepository, SqliteJobErrorRepository, SqliteJobRepository,
    SqliteProcessorRepository, TokioTriggerService,
};
use jobproc_worker::{JobEngine, ProcessorLoader, SubprocessBackend};

/// 引擎停止后等待终态写入的最短时间
const MIN_COMPLETION_DRAIN: Duration = Duration::from_secs(5);

/// 主应用程序：存储、引擎、调度与管理服务的装配
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    job_repo: Arc<dyn JobRepository>,
    engine: Arc<JobEngine>,
    executor: Arc<JobExecutionService>,
    scheduler: Arc<JobScheduler>,
    recovery: MissedJobRecovery,
    registry: Arc<ProcessorRegistry>,
    admin: Arc<AdminService>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("创建数据库连接池失败")?;
        database.migrate().await.context("数据库迁移失败")?;

        let pool = database.pool().clone();
        let job_repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool.clone()));
        let processor_repo = Arc::new(SqliteProcessorRepository::new(pool.clone()));
        let job_error_repo = Arc::new(SqliteJobErrorRepository::new(pool.clone()));
        let input_file_repo = Arc::new(SqliteInputFileRepository::new(pool));

        let backend = Arc::new(SubprocessBackend::from_config(&config.engine));
        let loader = Arc::new(ProcessorLoader::new(backend));
        let engine = Arc::new(JobEngine::new(
            loader.clone(),
            config.engine.effective_pool_size(),
        ));

        let executor = Arc::new(JobExecutionService::new(
            job_repo.clone(),
            processor_repo.clone(),
            job_error_repo.clone(),
            input_file_repo.clone(),
            engine.clone(),
            FallbackPackage::from_config(&config.engine),
        ));

        let triggers: Arc<dyn TriggerService> = Arc::new(TokioTriggerService::new());
        let scheduler = Arc::new(JobScheduler::new(
            job_repo.clone(),
            input_file_repo,
            triggers,
            executor.clone(),
            config.scheduler.clone(),
        ));
        let recovery = MissedJobRecovery::new(job_repo.clone(), executor.clone());
        let registry = Arc::new(ProcessorRegistry::new(processor_repo, loader));
        let admin = Arc::new(AdminService::new(
            engine.clone(),
            job_repo.clone(),
            job_error_repo,
        ));

        info!(
            pool_size = engine.pool_size(),
            processor_dir = %config.engine.processor_dir,
            "应用程序初始化完成"
        );

        Ok(Self {
            config,
            database,
            job_repo,
            engine,
            executor,
            scheduler,
            recovery,
            registry,
            admin,
        })
    }

    /// 补跑错过的作业，再为未来的作业重新注册触发器
    pub async fn start(&self) -> Result<()> {
        let now = Utc::now();

        if self.config.scheduler.recover_on_startup {
            let report = self
                .recovery
                .recover_missed_jobs(now)
                .await
                .context("补跑错过的作业失败")?;
            if !report.errors.is_empty() {
                warn!(failed = report.errors.len(), "部分作业补跑失败");
            }
        } else {
            info!("已禁用启动补跑");
        }

        self.scheduler
            .rearm_pending(now)
            .await
            .context("重新注册触发器失败")?;
        Ok(())
    }

    /// 启动后阻塞到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.start().await?;
        info!("作业引擎已就绪");

        let _ = shutdown_rx.recv().await;
        self.stop().await;
        Ok(())
    }

    /// 取消全部触发器，停止引擎并等待在途作业及其终态写入，最后关闭数据库
    pub async fn stop(&self) {
        info!("开始关闭应用程序");
        self.scheduler.shutdown().await;

        let grace = Duration::from_secs(self.config.engine.shutdown_timeout_seconds);
        if !self.engine.shutdown(grace).await {
            warn!(grace_secs = grace.as_secs(), "在途作业未在宽限期内结束，已取消");
        }
        if !self.executor.drain(grace.max(MIN_COMPLETION_DRAIN)).await {
            error!("部分作业终态未能在关闭前写入");
        }

        if let Err(e) = self.database.health_check().await {
            error!(error = %e, "关闭前数据库不可用");
        }
        self.database.close().await;
        info!("应用程序已关闭");
    }

    pub fn job_repo(&self) -> &Arc<dyn JobRepository> {
        &self.job_repo
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn admin(&self) -> &Arc<AdminService> {
        &self.admin
    }
}
