//! 插件处理器契约
//!
//! 处理器只暴露两个操作：`review_job` 返回处理时间预估，
//! `process_job` 执行实际工作。引擎根据预估的 1.5 倍计算超时。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Job, JobStatus};
use jobproc_errors::JobProcResult;

/// 超时 = 预估 × 1.5
pub const TIMEOUT_MARGIN_NUMERATOR: u64 = 3;
pub const TIMEOUT_MARGIN_DENOMINATOR: u64 = 2;

/// 传给处理器的输入
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputData {
    pub job_id: Option<i64>,
    pub job_name: String,
    pub processor_name: String,
    pub comment: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub input_files: Vec<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl InputData {
    /// 由作业持久化字段和输入文件路径组装
    pub fn from_job(job: &Job, input_files: Vec<String>) -> Self {
        let parameters = job
            .parameters
            .as_object()
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Self {
            job_id: Some(job.id),
            job_name: job.name.clone(),
            processor_name: job.processor_name.clone(),
            comment: job.comment.clone(),
            notes: job.notes.clone(),
            parameters,
            input_files,
            submitted_at: Some(job.submission_time),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobEstimate {
    pub max_time_to_process_millis: u64,
}

impl JobEstimate {
    pub fn new(max_time_to_process_millis: u64) -> Self {
        Self {
            max_time_to_process_millis,
        }
    }

    pub fn timeout_millis(&self) -> u64 {
        self.max_time_to_process_millis
            .saturating_mul(TIMEOUT_MARGIN_NUMERATOR)
            / TIMEOUT_MARGIN_DENOMINATOR
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis())
    }
}

/// 处理器输出，也是引擎对每次执行给出的结构化结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputData {
    pub job_id: Option<i64>,
    pub status: Option<JobStatus>,
    pub error_code: Option<String>,
    pub error_reason: Option<String>,
    pub output_note: Option<String>,
    #[serde(default)]
    pub output_parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub output_files: Vec<String>,
}

impl OutputData {
    pub fn success(job_id: Option<i64>) -> Self {
        Self {
            job_id,
            status: Some(JobStatus::Success),
            ..Default::default()
        }
    }

    /// 引擎生成的错误结果，错误码即状态或错误类别
    pub fn error(
        job_id: Option<i64>,
        status: JobStatus,
        error_code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            status: Some(status),
            error_code: Some(error_code.into()),
            error_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn has_error_code(&self) -> bool {
        self.error_code.as_deref().is_some_and(|code| !code.is_empty())
    }

    /// 未显式给出状态时：无错误字段视为 SUCCESS，否则为 FAILED
    pub fn resolved_status(&self) -> JobStatus {
        match self.status {
            Some(status) => status,
            None if self.has_error_code() || self.error_reason.is_some() => JobStatus::Failed,
            None => JobStatus::Success,
        }
    }
}

/// 插件处理器能力接口
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// 预估最大处理时间，调用本身不设超时
    async fn review_job(&self, input: &InputData) -> JobProcResult<JobEstimate>;

    async fn process_job(&self, input: &InputData) -> JobProcResult<OutputData>;
}
