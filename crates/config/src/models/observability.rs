use crate::validation::ConfigValidator;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    /// Prometheus 导出地址，例如 "0.0.0.0:9000"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_listen: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_listen: None,
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(crate::ConfigError::Validation(format!(
                "Invalid log level: {}. Valid options: {:?}",
                self.log_level, valid_levels
            )));
        }

        if let Some(addr) = &self.metrics_listen {
            addr.parse::<std::net::SocketAddr>().map_err(|e| {
                crate::ConfigError::Validation(format!(
                    "observability.metrics_listen is not a socket address: {e}"
                ))
            })?;
        }
        Ok(())
    }
}
