//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{InputDataFile, Job, JobCompletion, JobError, JobStatus, ProcessorDefinition};
use jobproc_errors::JobProcResult;

/// 作业仓储抽象
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &Job) -> JobProcResult<Job>;
    async fn find_by_id(&self, id: i64) -> JobProcResult<Option<Job>>;
    async fn find_by_status(&self, status: JobStatus) -> JobProcResult<Vec<Job>>;

    /// `expected` -> SCHEDULED 比较并交换：写入新的运行时间，清空上一次执行的时间与错误
    ///
    /// 返回 false 表示作业不存在或状态已不是 `expected`。
    async fn reschedule(
        &self,
        id: i64,
        expected: JobStatus,
        run_at: DateTime<Utc>,
    ) -> JobProcResult<bool>;

    /// SCHEDULED -> RUNNING 比较并交换，并记录开始时间
    ///
    /// 返回 false 表示作业已不处于 SCHEDULED（重复触发）。
    async fn mark_running(&self, id: i64, started_at: DateTime<Utc>) -> JobProcResult<bool>;

    /// RUNNING -> 终态 比较并交换
    async fn complete(&self, id: i64, completion: &JobCompletion) -> JobProcResult<bool>;

    /// SCHEDULED -> SCHEDULE_FAILED，原因写入 notes 与 error_reason
    async fn mark_schedule_failed(&self, id: i64, reason: &str) -> JobProcResult<bool>;
}

/// 处理器注册仓储抽象，处理器名唯一
#[async_trait]
pub trait ProcessorRepository: Send + Sync {
    /// 按处理器名插入或更新
    async fn upsert(&self, definition: &ProcessorDefinition) -> JobProcResult<ProcessorDefinition>;
    async fn find_by_name(&self, processor_name: &str) -> JobProcResult<Option<ProcessorDefinition>>;
    async fn find_active_by_name(
        &self,
        processor_name: &str,
    ) -> JobProcResult<Option<ProcessorDefinition>>;
    async fn delete(&self, id: i64) -> JobProcResult<bool>;
    async fn list(&self) -> JobProcResult<Vec<ProcessorDefinition>>;
}

#[async_trait]
pub trait JobErrorRepository: Send + Sync {
    async fn append(&self, error: &JobError) -> JobProcResult<JobError>;
    async fn find_by_job_id(&self, job_id: i64) -> JobProcResult<Vec<JobError>>;
}

#[async_trait]
pub trait InputFileRepository: Send + Sync {
    async fn add(&self, file: &InputDataFile) -> JobProcResult<InputDataFile>;
    async fn find_by_job_id(&self, job_id: i64) -> JobProcResult<Vec<InputDataFile>>;
}
