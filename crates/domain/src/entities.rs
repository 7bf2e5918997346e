use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 作业：一次独立的、被调度执行的工作单元
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: i64,
    pub name: String,
    /// 处理器逻辑名，通过 ProcessorDefinition 解析为插件包
    pub processor_name: String,
    pub comment: Option<String>,
    pub notes: Option<String>,
    /// 提交时附带的参数（JSON 对象）
    pub parameters: serde_json::Value,
    pub submission_time: DateTime<Utc>,
    /// 最早允许执行的时间
    pub scheduled_run_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub error_code: Option<String>,
    pub error_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMED_OUT")]
    TimedOut,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "SCHEDULE_FAILED")]
    ScheduleFailed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED_OUT",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::ScheduleFailed => "SCHEDULE_FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Scheduled | JobStatus::Running)
    }

    /// 状态机中允许的迁移
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Scheduled, JobStatus::Running) => true,
            (JobStatus::Scheduled, JobStatus::ScheduleFailed) => true,
            (JobStatus::Running, next) => next.is_terminal() && next != JobStatus::ScheduleFailed,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(JobStatus::Scheduled),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILED" => Ok(JobStatus::Failed),
            "TIMED_OUT" => Ok(JobStatus::TimedOut),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            "SCHEDULE_FAILED" => Ok(JobStatus::ScheduleFailed),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

impl Job {
    /// 创建处于 SCHEDULED 状态的新作业，运行时间不早于提交时间
    pub fn new(name: String, processor_name: String, run_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            name,
            processor_name,
            comment: None,
            notes: None,
            parameters: serde_json::Value::Object(serde_json::Map::new()),
            submission_time: now,
            scheduled_run_time: run_at.max(now),
            start_time: None,
            end_time: None,
            status: JobStatus::Scheduled,
            error_code: None,
            error_reason: None,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.status == JobStatus::Scheduled
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// 计划运行时间已过（严格早于 now）
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_run_time < now
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        if let (Some(started), Some(ended)) = (self.start_time, self.end_time) {
            Some((ended - started).num_milliseconds())
        } else {
            None
        }
    }
}

/// 终态写入内容
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub status: JobStatus,
    pub end_time: DateTime<Utc>,
    pub error_code: Option<String>,
    pub error_reason: Option<String>,
}

/// 处理器注册信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorDefinition {
    pub id: i64,
    /// 处理器逻辑名（唯一键）
    pub processor_name: String,
    pub package_path: String,
    /// SHA-256 十六进制摘要，可为空
    pub checksum: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessorDefinition {
    pub fn new(processor_name: String, package_path: String, checksum: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            processor_name,
            package_path,
            checksum,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 作业错误记录，只追加
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub id: i64,
    pub job_id: i64,
    pub reason_code: String,
    pub reason_string: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JobError {
    pub fn new(job_id: i64, reason_code: String, reason_string: Option<String>) -> Self {
        Self {
            id: 0,
            job_id,
            reason_code,
            reason_string,
            created_at: Utc::now(),
        }
    }
}

/// 作业附带的输入文件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputDataFile {
    pub id: i64,
    pub job_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl InputDataFile {
    pub fn new(job_id: i64, file_name: String, file_path: String, file_size: Option<i64>) -> Self {
        Self {
            id: 0,
            job_id,
            file_name,
            file_path,
            file_size,
            created_at: Utc::now(),
        }
    }
}
