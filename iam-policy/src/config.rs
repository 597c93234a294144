use crate::error::PolicyError;
use logger_redacted::LoggerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "IAM_POLICY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyServiceConfig {
    /// Upper bound for every storage call; unbounded when absent
    pub storage_timeout_ms: Option<u64>,
    pub database: DatabaseConfig,
    pub logging: LoggerConfig,
}

impl Default for PolicyServiceConfig {
    fn default() -> Self {
        Self {
            storage_timeout_ms: Some(5_000),
            database: DatabaseConfig::default(),
            logging: LoggerConfig::default(),
        }
    }
}

impl PolicyServiceConfig {
    /// Load defaults, then the optional file, then `IAM_POLICY__*` variables
    /// (`IAM_POLICY__DATABASE__URL`, `IAM_POLICY__STORAGE_TIMEOUT_MS`, ...)
    pub fn load(path: Option<&Path>) -> Result<Self, PolicyError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn storage_timeout(&self) -> Option<Duration> {
        self.storage_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/iam".to_string(),
            max_connections: 50,
            min_connections: 5,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}
