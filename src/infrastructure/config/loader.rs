use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid quality_threshold: {0}. Must be between 0 and 100")]
    InvalidQualityThreshold(u32),

    #[error("invalid max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u32),

    #[error("invalid max_parallel_agents: {0}. Must be at least 1")]
    InvalidMaxParallelAgents(u32),

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("invalid max_attempts: {0}. Cannot be 0")]
    InvalidMaxAttempts(u32),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.orchestrator/config.yaml` (project config)
    /// 3. `.orchestrator/local.yaml` (project local overrides, optional)
    /// 4. Environment variables (`ORCHESTRATOR_` prefix, `__` nesting separator)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".orchestrator/config.yaml"))
            .merge(Yaml::file(".orchestrator/local.yaml"))
            .merge(Env::prefixed("ORCHESTRATOR_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("ORCHESTRATOR_").split("__"))
            .extract()
            .context("failed to extract configuration from file")?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.orchestration.quality_threshold > 100 {
            return Err(ConfigError::InvalidQualityThreshold(config.orchestration.quality_threshold));
        }
        if config.orchestration.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(0));
        }
        if config.orchestration.max_parallel_agents == 0 {
            return Err(ConfigError::InvalidMaxParallelAgents(0));
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(0));
        }
        if config.agent_client.initial_backoff_ms >= config.agent_client.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.agent_client.initial_backoff_ms,
                config.agent_client.max_backoff_ms,
            ));
        }
        if config.outbox.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }
        Ok(())
    }
}
