//! Configuration sources: defaults → optional TOML file → environment.
//!
//! Environment names are the flat, service-level ones (`SERVER_PORT`,
//! `REDIS_ADDR`, …); the table below maps each onto its place in the
//! sectioned model. Environment always wins over the file.

use std::path::PathBuf;

use config::{ConfigError, File};

use super::models::Config;

const DEFAULT_CONFIG_PATH: &str = "config/proxybox.toml";

/// Flat env var → sectioned key.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("SERVER_PORT", "server.port"),
    ("SERVER_HOST", "server.host"),
    ("SERVER_READ_TIMEOUT", "server.read_timeout_secs"),
    ("SERVER_WRITE_TIMEOUT", "server.write_timeout_secs"),
    ("SERVER_IDLE_TIMEOUT", "server.idle_timeout_secs"),
    ("WORKER_COUNT", "worker.count"),
    ("WORKER_QUEUE_SIZE", "worker.queue_size"),
    ("REDIS_ADDR", "redis.addr"),
    ("REDIS_PASSWORD", "redis.password"),
    ("REDIS_DB", "redis.db"),
    ("REDIS_RESULT_TTL", "redis.result_ttl_secs"),
    ("REDIS_DEDUP_TTL", "redis.dedup_ttl_secs"),
    ("GITHUB_OWNER", "github.owner"),
    ("GITHUB_REPO", "github.repo"),
    ("SSH_KEY_PATH", "github.ssh_key_path"),
    ("LOG_LEVEL", "app.log_level"),
    ("APP_TIMEOUT", "app.timeout_secs"),
    ("REFRESH_INTERVAL", "app.refresh_interval_secs"),
    ("MAX_CONCURRENT", "app.max_concurrent"),
    ("ENCRYPTION_KEY", "app.encryption_key"),
    ("CHECK_HOST", "app.check_host"),
    ("API_KEY", "app.api_key"),
    ("XRAY_BIN", "app.xray_bin"),
    ("GEOIP_MMDB_PATH", "app.mmdb_path"),
    ("TELEGRAM_BOT_TOKEN", "telegram.bot_token"),
    ("TELEGRAM_CHANNEL", "telegram.channel"),
    ("TELEGRAM_TEMPLATE", "telegram.template"),
    ("TELEGRAM_PROXY_URL", "telegram.proxy_url"),
    ("TELEGRAM_SENDING_INTERVAL", "telegram.sending_interval_secs"),
];

/// Loads from the default (or `PROXYBOX_CONFIG`-pointed) file plus the
/// environment. The file is optional.
pub fn load() -> Result<Config, ConfigError> {
    let path = std::env::var("PROXYBOX_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    build(path, false)
}

/// Loads from an explicit file path (used by tests and `--config`).
pub fn load_from_path(path: PathBuf) -> Result<Config, ConfigError> {
    build(path, true)
}

fn build(path: PathBuf, required: bool) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(File::from(path).required(required));

    for (env, key) in ENV_OVERRIDES {
        if let Ok(value) = std::env::var(env) {
            builder = builder.set_override(*key, value)?;
        }
    }

    builder.build()?.try_deserialize()
}
