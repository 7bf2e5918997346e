use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 启动时补跑错过触发的作业
    pub recover_on_startup: bool,
    /// "立即运行" 请求的延迟
    pub run_now_delay_seconds: u64,
    /// 提交作业时的最小延迟
    pub min_submit_delay_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recover_on_startup: true,
            run_now_delay_seconds: 3,
            min_submit_delay_seconds: 0,
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.run_now_delay_seconds,
            "scheduler.run_now_delay_seconds",
        )?;
        if self.min_submit_delay_seconds > 86_400 {
            return Err(crate::ConfigError::Validation(
                "scheduler.min_submit_delay_seconds must be less than or equal to 86400"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
