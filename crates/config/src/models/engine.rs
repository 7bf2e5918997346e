use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POOL_SIZE: usize = 5;
pub const MIN_POOL_SIZE: usize = 1;
pub const MAX_POOL_SIZE: usize = 50;

/// 作业执行引擎配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// 工作池大小，使用时截断到 [1, 50]
    pub pool_size: usize,
    /// 未注册处理器时的默认插件目录
    pub processor_dir: String,
    /// 默认插件包扩展名（不含点）
    pub package_extension: String,
    /// 插件 describe 调用的超时
    pub describe_timeout_seconds: u64,
    /// 单个插件输出流的最大字节数
    pub max_output_bytes: usize,
    /// 关闭时等待在途作业的时间
    pub shutdown_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            processor_dir: "./processors".to_string(),
            package_extension: "plugin".to_string(),
            describe_timeout_seconds: 10,
            max_output_bytes: 10 * 1024 * 1024,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl EngineConfig {
    pub fn clamp_pool_size(size: usize) -> usize {
        size.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
    }

    pub fn effective_pool_size(&self) -> usize {
        Self::clamp_pool_size(self.pool_size)
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.processor_dir, "engine.processor_dir")?;
        ValidationUtils::validate_not_empty(&self.package_extension, "engine.package_extension")?;
        if self.package_extension.starts_with('.') {
            return Err(crate::ConfigError::Validation(
                "engine.package_extension must not start with '.'".to_string(),
            ));
        }
        ValidationUtils::validate_timeout_seconds(
            self.describe_timeout_seconds,
            "engine.describe_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.shutdown_timeout_seconds,
            "engine.shutdown_timeout_seconds",
        )?;
        ValidationUtils::validate_count(self.max_output_bytes, "engine.max_output_bytes", 256 * 1024 * 1024)?;
        Ok(())
    }
}
