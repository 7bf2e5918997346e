use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig, engine::EngineConfig, observability::ObservabilityConfig,
    scheduler::SchedulerConfig,
};
use crate::validation::ConfigValidator;

pub const ENV_PREFIX: &str = "JOBPROC";

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/jobproc.toml",
    "jobproc.toml",
    "/etc/jobproc/config.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 加载顺序：默认值 < TOML 文件 < JOBPROC__* 环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.engine.validate()?;
        self.scheduler.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogFormat;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.url, "sqlite://jobproc.db");
        assert_eq!(config.engine.pool_size, 5);
        assert_eq!(config.engine.package_extension, "plugin");
        assert_eq!(config.scheduler.run_now_delay_seconds, 3);
        assert!(config.scheduler.recover_on_startup);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [engine]
            pool_size = 12
            processor_dir = "/opt/processors"

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.pool_size, 12);
        assert_eq!(config.engine.processor_dir, "/opt/processors");
        assert_eq!(config.engine.describe_timeout_seconds, 10);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [observability]
            log_level = "verbose"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"sqlite::memory:\"\n\n[scheduler]\nrun_now_delay_seconds = 1"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.scheduler.run_now_delay_seconds, 1);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/jobproc.toml")).is_err());
    }
}
