use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://jobproc.db".to_string(),
            max_connections: 5,
        }
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_url(&self.url, "database.url")?;

        if !self.url.starts_with("sqlite:") {
            return Err(crate::ConfigError::Validation(
                "database.url must start with sqlite:".to_string(),
            ));
        }

        ValidationUtils::validate_count(self.max_connections as usize, "database.max_connections", 100)?;
        Ok(())
    }
}
