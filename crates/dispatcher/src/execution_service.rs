//! 作业执行协调
//!
//! 连接持久化的作业状态与执行引擎，负责作业状态机：
//! `SCHEDULED -> RUNNING -> {SUCCESS, FAILED, TIMED_OUT, CANCELLED}`。
//! 两次状态写入都是比较并交换，重复触发和外部取消都不会覆盖已有终态。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use jobproc_config::EngineConfig;
use jobproc_domain::{
    InputData, InputFileRepository, JobCompletion, JobError, JobErrorRepository, JobRepository,
    JobStatus, OutputData, ProcessorRepository,
};
use jobproc_errors::{codes, JobProcError, JobProcResult};
use jobproc_worker::JobEngine;

/// 终态写入的最大尝试次数
const COMPLETION_WRITE_ATTEMPTS: u32 = 3;
const COMPLETION_RETRY_DELAY: Duration = Duration::from_millis(50);

/// 未注册处理器时的默认包位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPackage {
    pub processor_dir: String,
    pub package_extension: String,
}

impl FallbackPackage {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            processor_dir: config.processor_dir.clone(),
            package_extension: config.package_extension.clone(),
        }
    }

    /// `{dir}/{处理器名最后一段}.{ext}`
    pub fn path_for(&self, processor_name: &str) -> String {
        let simple_name = processor_name
            .rsplit('.')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(processor_name);
        Path::new(&self.processor_dir)
            .join(format!("{simple_name}.{}", self.package_extension))
            .display()
            .to_string()
    }
}

/// `run_job` 的结果
#[derive(Debug)]
pub enum RunOutcome {
    /// 作业不存在
    NotFound,
    /// 作业不处于 SCHEDULED
    Skipped(JobStatus),
    /// 读取后被另一次触发抢先置为 RUNNING
    AlreadyClaimed,
    /// 已提交执行；句柄在终态写入后返回结果状态，写入最终失败时返回错误
    Started(JoinHandle<JobProcResult<JobStatus>>),
}

impl RunOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, RunOutcome::Started(_))
    }
}

pub struct JobExecutionService {
    job_repo: Arc<dyn JobRepository>,
    processor_repo: Arc<dyn ProcessorRepository>,
    job_error_repo: Arc<dyn JobErrorRepository>,
    input_file_repo: Arc<dyn InputFileRepository>,
    engine: Arc<JobEngine>,
    fallback: FallbackPackage,
    completions: TaskTracker,
}

impl JobExecutionService {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        processor_repo: Arc<dyn ProcessorRepository>,
        job_error_repo: Arc<dyn JobErrorRepository>,
        input_file_repo: Arc<dyn InputFileRepository>,
        engine: Arc<JobEngine>,
        fallback: FallbackPackage,
    ) -> Self {
        Self {
            job_repo,
            processor_repo,
            job_error_repo,
            input_file_repo,
            engine,
            fallback,
            completions: TaskTracker::new(),
        }
    }

    pub fn engine(&self) -> &Arc<JobEngine> {
        &self.engine
    }

    /// 执行一个已调度的作业
    ///
    /// 同一作业的并发调用只有一个能通过 SCHEDULED -> RUNNING 的比较并交换。
    pub async fn run_job(&self, job_id: i64) -> JobProcResult<RunOutcome> {
        let Some(job) = self.job_repo.find_by_id(job_id).await? else {
            debug!(job_id = job_id, "作业不存在，跳过执行");
            return Ok(RunOutcome::NotFound);
        };
        if job.status != JobStatus::Scheduled {
            debug!(job_id = job_id, status = %job.status, "作业不处于 SCHEDULED，跳过执行");
            return Ok(RunOutcome::Skipped(job.status));
        }

        let (package_path, checksum) = self.resolve_package(&job.processor_name).await?;
        let input_files: Vec<String> = self
            .input_file_repo
            .find_by_job_id(job_id)
            .await?
            .into_iter()
            .map(|f| f.file_path)
            .collect();

        if !self.job_repo.mark_running(job_id, Utc::now()).await? {
            debug!(job_id = job_id, "作业已被其他触发执行");
            return Ok(RunOutcome::AlreadyClaimed);
        }
        counter!("jobproc_jobs_started_total").increment(1);
        info!(
            job_id = job_id,
            processor_name = %job.processor_name,
            package_path = %package_path,
            "作业开始执行"
        );

        let input = InputData::from_job(&job, input_files);
        let execution = self.engine.execute_async(input, package_path, checksum);

        let job_repo = self.job_repo.clone();
        let job_error_repo = self.job_error_repo.clone();
        let handle = self.completions.spawn(async move {
            let output = match execution.await {
                Ok(output) => output,
                Err(e) => OutputData::error(
                    Some(job_id),
                    JobStatus::Failed,
                    codes::ENGINE_ERROR,
                    format!("执行任务异常终止: {e}"),
                ),
            };
            let result =
                record_completion(job_repo.as_ref(), job_error_repo.as_ref(), job_id, output).await;
            if let Err(e) = &result {
                error!(job_id = job_id, error = %e, "写入作业终态失败，作业停留在 RUNNING");
            }
            result
        });

        Ok(RunOutcome::Started(handle))
    }

    /// 等待已提交作业的终态写入完成
    ///
    /// 在引擎关闭之后、数据库关闭之前调用。超过 `limit` 返回 false。
    pub async fn drain(&self, limit: Duration) -> bool {
        self.completions.close();
        if tokio::time::timeout(limit, self.completions.wait()).await.is_ok() {
            debug!("作业终态已全部写入");
            return true;
        }
        warn!(pending = self.completions.len(), "等待作业终态写入超时");
        false
    }

    /// 解析处理器的包路径与摘要，未注册时退回默认路径
    pub async fn resolve_package(
        &self,
        processor_name: &str,
    ) -> JobProcResult<(String, Option<String>)> {
        if let Some(definition) = self.processor_repo.find_active_by_name(processor_name).await? {
            return Ok((definition.package_path, definition.checksum));
        }

        let path = self.fallback.path_for(processor_name);
        warn!(
            processor_name = processor_name,
            package_path = %path,
            "处理器未注册，使用默认包路径"
        );
        Ok((path, None))
    }
}

/// 写入终态；RUNNING 已被其他路径改为终态时不写入
async fn record_completion(
    job_repo: &dyn JobRepository,
    job_error_repo: &dyn JobErrorRepository,
    job_id: i64,
    output: OutputData,
) -> JobProcResult<JobStatus> {
    let mut status = output.resolved_status();
    let mut error_code = output.error_code.clone().filter(|c| !c.is_empty());
    let mut error_reason = output.error_reason.clone();

    if !JobStatus::Running.can_transition_to(status) {
        warn!(job_id = job_id, status = %status, "处理器返回了非终态状态");
        error_reason = Some(format!("处理器返回了无效状态: {status}"));
        error_code = Some(codes::ENGINE_ERROR.to_string());
        status = JobStatus::Failed;
    }

    let completion = JobCompletion {
        status,
        end_time: Utc::now(),
        error_code: error_code.clone(),
        error_reason: error_reason.clone(),
    };

    if !complete_with_retry(job_repo, job_id, &completion).await? {
        debug!(job_id = job_id, status = %status, "作业已处于终态，忽略执行结果");
        return Ok(status);
    }

    info!(job_id = job_id, status = %status, "作业执行结束");
    if let Some(code) = error_code {
        let record = JobError::new(job_id, code, error_reason);
        if let Err(e) = job_error_repo.append(&record).await {
            error!(job_id = job_id, error = %e, "写入作业错误记录失败");
        }
    }
    Ok(status)
}

/// 存储错误时按线性退避重试终态写入
async fn complete_with_retry(
    job_repo: &dyn JobRepository,
    job_id: i64,
    completion: &JobCompletion,
) -> JobProcResult<bool> {
    let mut attempt = 1;
    loop {
        match job_repo.complete(job_id, completion).await {
            Ok(written) => {
                if attempt > 1 {
                    info!(job_id = job_id, attempt = attempt, "终态写入重试成功");
                }
                return Ok(written);
            }
            Err(e) if e.is_retryable() && attempt < COMPLETION_WRITE_ATTEMPTS => {
                warn!(
                    job_id = job_id,
                    attempt = attempt,
                    max_attempts = COMPLETION_WRITE_ATTEMPTS,
                    error = %e,
                    "终态写入失败，稍后重试"
                );
                tokio::time::sleep(COMPLETION_RETRY_DELAY * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(JobProcError::DatabaseOperation(format!(
                    "作业 {job_id} 终态 {} 写入失败（第 {attempt} 次尝试）: {e}",
                    completion.status
                )))
            }
        }
    }
}
