//! Configuration management.
//!
//! Layered loading:
//! 1. Default values (embedded in the structs)
//! 2. Optional TOML file (`config/proxybox.toml`, or `PROXYBOX_CONFIG`)
//! 3. Environment variables (highest priority; flat names like
//!    `SERVER_PORT`, `REDIS_ADDR`, `ENCRYPTION_KEY`, `CHECK_HOST`)

mod models;
mod sources;
mod validation;

pub use models::{
    AppConfig, Config, GithubConfig, RedisConfig, ServerConfig, TelegramConfig, WorkerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path. Useful for tests and the
    /// `--config` flag.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_path(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_path_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[worker]\ncount = 0\n").unwrap();

        let result = Config::load_from_path(path);
        assert!(matches!(
            result,
            Err(ConfigError::Validation(ValidationError::NoWorkers))
        ));
    }
}
