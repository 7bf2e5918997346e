use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use jobproc_domain::{JobCompletion, JobError, JobErrorRepository, JobRepository, JobStatus};
use jobproc_errors::{codes, JobProcResult};
use jobproc_worker::{EngineStatus, JobEngine};

pub const USER_CANCEL_REASON: &str = "Job cancelled by user";

/// 管理操作：取消作业、调整工作池、查询引擎状态
pub struct AdminService {
    engine: Arc<JobEngine>,
    job_repo: Arc<dyn JobRepository>,
    job_error_repo: Arc<dyn JobErrorRepository>,
}

impl AdminService {
    pub fn new(
        engine: Arc<JobEngine>,
        job_repo: Arc<dyn JobRepository>,
        job_error_repo: Arc<dyn JobErrorRepository>,
    ) -> Self {
        Self {
            engine,
            job_repo,
            job_error_repo,
        }
    }

    /// 取消在途作业；引擎未跟踪该作业时返回 false
    pub async fn cancel_job(&self, job_id: i64) -> JobProcResult<bool> {
        if !self.engine.cancel_job(job_id) {
            debug!(job_id = job_id, "作业未在执行，无法取消");
            return Ok(false);
        }

        let completion = JobCompletion {
            status: JobStatus::Cancelled,
            end_time: Utc::now(),
            error_code: Some(codes::CANCELLED.to_string()),
            error_reason: Some(USER_CANCEL_REASON.to_string()),
        };
        if self.job_repo.complete(job_id, &completion).await? {
            self.job_error_repo
                .append(&JobError::new(
                    job_id,
                    codes::CANCELLED.to_string(),
                    Some(USER_CANCEL_REASON.to_string()),
                ))
                .await?;
        }

        info!(job_id = job_id, "作业已取消");
        Ok(true)
    }

    pub fn resize_pool(&self, new_size: usize) -> usize {
        self.engine.resize_pool(new_size)
    }

    pub fn engine_status(&self) -> EngineStatus {
        self.engine.status()
    }
}
