use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_read_timeout() -> u64 {
    30
}

fn default_write_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    60
}

/// Worker pool sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { count: default_worker_count(), queue_size: default_queue_size() }
    }
}

fn default_worker_count() -> usize {
    5
}

fn default_queue_size() -> usize {
    100
}

/// Dedup / result cache connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_addr")]
    pub addr: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
    /// TTL for stored scan results awaiting the publisher.
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,
    /// TTL for dedup markers.
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,
}

impl RedisConfig {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: default_redis_addr(),
            password: String::new(),
            db: 0,
            result_ttl_secs: default_result_ttl(),
            dedup_ttl_secs: default_dedup_ttl(),
        }
    }
}

fn default_redis_addr() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_result_ttl() -> u64 {
    30 * 60
}

fn default_dedup_ttl() -> u64 {
    60 * 60
}

/// Remote artifact repository
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub ssh_key_path: String,
}

impl GithubConfig {
    pub fn is_configured(&self) -> bool {
        !self.owner.is_empty() || !self.repo.is_empty() || !self.ssh_key_path.is_empty()
    }
}

/// Application-level settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Per-check hard timeout.
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// 0 means "derive from machine shape".
    #[serde(default)]
    pub max_concurrent: usize,
    #[serde(default)]
    pub encryption_key: String,
    /// Reachability target as host:port.
    #[serde(default = "default_check_host")]
    pub check_host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_xray_bin")]
    pub xray_bin: String,
    /// Optional local GeoIP database.
    #[serde(default)]
    pub mmdb_path: Option<PathBuf>,
    #[serde(default = "default_org_name")]
    pub org_name: String,
    #[serde(default = "default_remark_separator")]
    pub remark_separator: String,
}

impl AppConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Splits `check_host` into host and port. Validation guarantees the
    /// shape, so missing pieces fall back to the defaults.
    pub fn check_target(&self) -> (String, u16) {
        match self.check_host.rsplit_once(':') {
            Some((host, port)) => {
                (host.to_string(), port.parse().unwrap_or(crate::core::checker::DEFAULT_CHECK_PORT))
            }
            None => (self.check_host.clone(), crate::core::checker::DEFAULT_CHECK_PORT),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            timeout_secs: default_check_timeout(),
            refresh_interval_secs: default_refresh_interval(),
            max_concurrent: 0,
            encryption_key: String::new(),
            check_host: default_check_host(),
            api_key: String::new(),
            xray_bin: default_xray_bin(),
            mmdb_path: None,
            org_name: default_org_name(),
            remark_separator: default_remark_separator(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_check_timeout() -> u64 {
    10
}

fn default_refresh_interval() -> u64 {
    60 * 60
}

fn default_check_host() -> String {
    "1.1.1.1:80".to_string()
}

fn default_xray_bin() -> String {
    "xray".to_string()
}

fn default_org_name() -> String {
    "NamiraNet".to_string()
}

fn default_remark_separator() -> String {
    " | ".to_string()
}

/// Notification sidecar
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub proxy_url: String,
    #[serde(default = "default_sending_interval")]
    pub sending_interval_secs: u64,
}

impl TelegramConfig {
    pub fn sending_interval(&self) -> Duration {
        Duration::from_secs(self.sending_interval_secs)
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel: String::new(),
            template: String::new(),
            proxy_url: String::new(),
            sending_interval_secs: default_sending_interval(),
        }
    }
}

fn default_sending_interval() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.worker.count, 5);
        assert_eq!(config.worker.queue_size, 100);
        assert_eq!(config.redis.addr, "127.0.0.1:6379");
        assert_eq!(config.redis.result_ttl(), Duration::from_secs(1800));
        assert_eq!(config.app.check_timeout(), Duration::from_secs(10));
        assert_eq!(config.app.check_target(), ("1.1.1.1".to_string(), 80));
        assert!(!config.github.is_configured());
    }

    #[test]
    fn check_target_splits_host_and_port() {
        let app = AppConfig { check_host: "example.com:443".to_string(), ..Default::default() };
        assert_eq!(app.check_target(), ("example.com".to_string(), 443));
    }
}
