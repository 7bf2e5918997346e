use thiserror::Error;


/// 引擎统一错误类型
#[derive(Debug, Error)]
pub enum JobProcError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("作业未找到: {id}")]
    JobNotFound { id: i64 },
    #[error("处理器未注册: {name}")]
    ProcessorNotFound { name: String },
    #[error("插件包不存在: {path}")]
    PackageNotFound { path: String },
    #[error("插件包校验失败: {path} (expected {expected}, actual {actual})")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("处理器加载失败: {0}")]
    Load(String),
    #[error("作业执行超时: {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },
    #[error("作业已取消")]
    Cancelled,
    #[error("作业执行错误: {0}")]
    Execution(String),
    #[error("触发器注册失败: {0}")]
    TriggerScheduling(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type JobProcResult<T> = Result<T, JobProcError>;

/// 持久化到作业记录中的错误码
pub mod codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INTEGRITY_ERROR: &str = "INTEGRITY_ERROR";
    pub const LOAD_ERROR: &str = "LOAD_ERROR";
    pub const TIMED_OUT: &str = "TIMED_OUT";
    pub const CANCELLED: &str = "CANCELLED";
    pub const FAILED: &str = "FAILED";
    pub const SCHEDULE_FAILED: &str = "SCHEDULE_FAILED";
    pub const ENGINE_ERROR: &str = "ENGINE_ERROR";
}

impl JobProcError {
    pub fn job_not_found(id: i64) -> Self {
        Self::JobNotFound { id }
    }
    pub fn package_not_found<S: Into<String>>(path: S) -> Self {
        Self::PackageNotFound { path: path.into() }
    }
    pub fn load_error<S: Into<String>>(msg: S) -> Self {
        Self::Load(msg.into())
    }
    pub fn execution_error<S: Into<String>>(msg: S) -> Self {
        Self::Execution(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// 作业记录和 JobError 行中使用的错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            JobProcError::PackageNotFound { .. } => codes::NOT_FOUND,
            JobProcError::Integrity { .. } => codes::INTEGRITY_ERROR,
            JobProcError::Load(_) => codes::LOAD_ERROR,
            JobProcError::ExecutionTimeout { .. } => codes::TIMED_OUT,
            JobProcError::Cancelled => codes::CANCELLED,
            JobProcError::Execution(_) => codes::FAILED,
            JobProcError::TriggerScheduling(_) => codes::SCHEDULE_FAILED,
            _ => codes::ENGINE_ERROR,
        }
    }

    /// 可以原样重试的存储错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobProcError::Database(_) | JobProcError::DatabaseOperation(_) | JobProcError::Io(_)
        )
    }
}

impl From<serde_json::Error> for JobProcError {
    fn from(err: serde_json::Error) -> Self {
        JobProcError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for JobProcError {
    fn from(err: anyhow::Error) -> Self {
        JobProcError::Internal(err.to_string())
    }
}
