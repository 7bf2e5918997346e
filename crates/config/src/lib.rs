pub mod models;
pub mod validation;

pub use models::{
    AppConfig, DatabaseConfig, EngineConfig, LogFormat, ObservabilityConfig, SchedulerConfig,
    DEFAULT_POOL_SIZE, MAX_POOL_SIZE, MIN_POOL_SIZE,
};
pub use validation::{ConfigValidator, ValidationUtils};

/// Configuration error type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error enumeration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("File error: {0}")]
    File(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<anyhow::Error> for ConfigError {
    fn from(err: anyhow::Error) -> Self {
        ConfigError::Configuration(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
