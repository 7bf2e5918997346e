use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use jobproc_config::SchedulerConfig;
use jobproc_domain::{
    trigger_key, InputDataFile, InputFileRepository, Job, JobRepository, JobStatus,
    TriggerCallback, TriggerService,
};
use jobproc_errors::{JobProcError, JobProcResult};

use crate::execution_service::{JobExecutionService, RunOutcome};

/// 提交作业请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSubmission {
    pub name: String,
    pub processor_name: String,
    pub comment: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// 为空时尽快执行
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input_files: Vec<SubmittedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedFile {
    pub file_name: String,
    pub file_path: String,
    pub file_size: Option<i64>,
}

/// 作业调度器
///
/// 以作业 id 为键注册一次性触发器，到期时调用 [`JobExecutionService::run_job`]。
pub struct JobScheduler {
    job_repo: Arc<dyn JobRepository>,
    input_file_repo: Arc<dyn InputFileRepository>,
    triggers: Arc<dyn TriggerService>,
    executor: Arc<JobExecutionService>,
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        input_file_repo: Arc<dyn InputFileRepository>,
        triggers: Arc<dyn TriggerService>,
        executor: Arc<JobExecutionService>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            job_repo,
            input_file_repo,
            triggers,
            executor,
            config,
        }
    }

    /// 注册一次性触发器；失败原样返回，由调用方标记 SCHEDULE_FAILED
    pub async fn schedule_trigger(&self, job_id: i64, run_at: DateTime<Utc>) -> JobProcResult<()> {
        let executor = self.executor.clone();
        let callback: TriggerCallback = Box::new(move || {
            async move {
                match executor.run_job(job_id).await {
                    Ok(RunOutcome::Started(_)) => debug!(job_id = job_id, "触发器启动了作业"),
                    Ok(outcome) => debug!(job_id = job_id, outcome = ?outcome, "触发器未启动作业"),
                    Err(e) => error!(job_id = job_id, error = %e, "触发作业执行失败"),
                }
            }
            .boxed()
        });

        self.triggers
            .schedule_at(&trigger_key(job_id), run_at, callback)
            .await?;
        debug!(job_id = job_id, run_at = %run_at, "作业触发器已注册");
        Ok(())
    }

    /// 先取消已有触发器（不存在时忽略）再重新注册
    pub async fn reschedule_trigger(
        &self,
        job_id: i64,
        run_at: DateTime<Utc>,
    ) -> JobProcResult<()> {
        if self.triggers.cancel(&trigger_key(job_id)).await? {
            debug!(job_id = job_id, "已取消旧触发器");
        }
        self.schedule_trigger(job_id, run_at).await
    }

    /// 创建作业并注册触发器
    ///
    /// 触发器注册失败时作业被标记为 SCHEDULE_FAILED 并返回。
    pub async fn submit_job(&self, submission: JobSubmission) -> JobProcResult<Job> {
        if submission.name.trim().is_empty() {
            return Err(JobProcError::validation_error("作业名称不能为空"));
        }
        if submission.processor_name.trim().is_empty() {
            return Err(JobProcError::validation_error("处理器名称不能为空"));
        }

        let now = Utc::now();
        let earliest = now + Duration::seconds(self.config.min_submit_delay_seconds as i64);
        let run_at = submission.run_at.unwrap_or(now).max(earliest);

        let mut job = Job::new(submission.name, submission.processor_name, run_at);
        job.comment = submission.comment;
        job.notes = submission.notes;
        job.parameters = serde_json::Value::Object(submission.parameters.into_iter().collect());

        let job = self.job_repo.create(&job).await?;
        for file in submission.input_files {
            self.input_file_repo
                .add(&InputDataFile::new(
                    job.id,
                    file.file_name,
                    file.file_path,
                    file.file_size,
                ))
                .await?;
        }

        match self.schedule_trigger(job.id, job.scheduled_run_time).await {
            Ok(()) => {
                info!(job_id = job.id, run_at = %job.scheduled_run_time, "作业已提交");
                Ok(job)
            }
            Err(e @ JobProcError::TriggerScheduling(_)) => {
                warn!(job_id = job.id, error = %e, "触发器注册失败，作业标记为 SCHEDULE_FAILED");
                self.job_repo.mark_schedule_failed(job.id, &e.to_string()).await?;
                self.job_repo
                    .find_by_id(job.id)
                    .await?
                    .ok_or_else(|| JobProcError::job_not_found(job.id))
            }
            Err(e) => Err(e),
        }
    }

    /// 立即（延迟几秒）重新运行 SCHEDULED 或 FAILED 的作业
    ///
    /// 状态检查与写入是同一次比较并交换，读取后被触发执行的作业不会被改回 SCHEDULED。
    pub async fn run_now(&self, job_id: i64) -> JobProcResult<Job> {
        let job = self
            .job_repo
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| JobProcError::job_not_found(job_id))?;

        if !matches!(job.status, JobStatus::Scheduled | JobStatus::Failed) {
            return Err(not_rerunnable(job_id, job.status));
        }

        let run_at = Utc::now() + Duration::seconds(self.config.run_now_delay_seconds as i64);
        if !self.job_repo.reschedule(job_id, job.status, run_at).await? {
            let current = self
                .job_repo
                .find_by_id(job_id)
                .await?
                .ok_or_else(|| JobProcError::job_not_found(job_id))?;
            warn!(job_id = job_id, status = %current.status, "作业状态已变化，放弃重新调度");
            return Err(not_rerunnable(job_id, current.status));
        }

        self.reschedule_trigger(job_id, run_at).await?;
        info!(job_id = job_id, run_at = %run_at, "作业已重新调度");
        self.job_repo
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| JobProcError::job_not_found(job_id))
    }

    /// 为运行时间仍在未来的 SCHEDULED 作业重新注册触发器
    ///
    /// 触发服务不跨进程保留，启动时在补跑之后调用。返回注册数量。
    pub async fn rearm_pending(&self, now: DateTime<Utc>) -> JobProcResult<usize> {
        let pending = self.triggers.pending_keys().await;
        let mut armed = 0;

        for job in self.job_repo.find_by_status(JobStatus::Scheduled).await? {
            if job.is_overdue(now) || pending.contains(&trigger_key(job.id)) {
                continue;
            }
            match self.schedule_trigger(job.id, job.scheduled_run_time).await {
                Ok(()) => armed += 1,
                Err(e) => {
                    warn!(job_id = job.id, error = %e, "重新注册触发器失败");
                    if let Err(mark_err) =
                        self.job_repo.mark_schedule_failed(job.id, &e.to_string()).await
                    {
                        error!(job_id = job.id, error = %mark_err, "标记 SCHEDULE_FAILED 失败");
                    }
                }
            }
        }

        info!(armed = armed, "已重新注册待执行作业的触发器");
        Ok(armed)
    }

    pub async fn shutdown(&self) {
        self.triggers.shutdown().await;
    }
}

fn not_rerunnable(job_id: i64, status: JobStatus) -> JobProcError {
    JobProcError::validation_error(format!("作业 {job_id} 当前状态为 {status}，不能立即运行"))
}
