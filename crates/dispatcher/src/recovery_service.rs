use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use jobproc_domain::{JobRepository, JobStatus};
use jobproc_errors::JobProcResult;

use crate::execution_service::{JobExecutionService, RunOutcome};

/// 恢复报告
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub recovered_job_ids: Vec<i64>,
    pub errors: Vec<String>,
    pub recovery_duration_ms: u64,
}

impl RecoveryReport {
    pub fn recovered_count(&self) -> usize {
        self.recovered_job_ids.len()
    }
}

/// 启动时补跑错过触发时间的作业
pub struct MissedJobRecovery {
    job_repo: Arc<dyn JobRepository>,
    executor: Arc<JobExecutionService>,
}

impl MissedJobRecovery {
    pub fn new(job_repo: Arc<dyn JobRepository>, executor: Arc<JobExecutionService>) -> Self {
        Self { job_repo, executor }
    }

    /// 对运行时间严格早于 `now` 的 SCHEDULED 作业直接调用 `run_job`
    ///
    /// 单个作业失败不影响其余作业。
    pub async fn recover_missed_jobs(&self, now: DateTime<Utc>) -> JobProcResult<RecoveryReport> {
        let start = Instant::now();
        info!("开始补跑错过的作业");

        let mut report = RecoveryReport::default();
        let scheduled = self.job_repo.find_by_status(JobStatus::Scheduled).await?;

        for job in scheduled.into_iter().filter(|j| j.is_overdue(now)) {
            match self.executor.run_job(job.id).await {
                Ok(RunOutcome::Started(_)) => {
                    debug!(job_id = job.id, scheduled_run_time = %job.scheduled_run_time, "已补跑作业");
                    report.recovered_job_ids.push(job.id);
                }
                Ok(outcome) => {
                    debug!(job_id = job.id, outcome = ?outcome, "作业无需补跑");
                }
                Err(e) => {
                    warn!(job_id = job.id, error = %e, "补跑作业失败");
                    report.errors.push(format!("作业 {}: {e}", job.id));
                }
            }
        }

        report.recovery_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            recovered = report.recovered_count(),
            failed = report.errors.len(),
            duration_ms = report.recovery_duration_ms,
            "补跑完成"
        );
        Ok(report)
    }
}
