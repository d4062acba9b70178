//! Scan core: parse → check → fill, fanned out under a bounded semaphore.
//!
//! The [`Scanner`] is the checker driver. It launches one task per link,
//! gated by a concurrency semaphore sized from the machine (CPUs and file
//! descriptors), and streams results back in completion order.

pub mod checker;
pub mod engine;
pub mod filler;
pub mod geoip;
pub mod outbound;
pub mod parser;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use checker::Checker;
use engine::ProxyEngine;
use filler::{Filler, RemarkTemplate};
use geoip::CountryResolver;
use parser::Protocol;

/// Outcome class of one checked link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    #[default]
    Success,
    Unavailable,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Success => "success",
            CheckStatus::Unavailable => "unavailable",
            CheckStatus::Error => "error",
        }
    }
}

/// Everything known about one checked link. Created once per link,
/// mutated only by the checker/filler pair, then published immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    /// The link text — rewritten to canonical form on success.
    pub raw: String,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remark: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Scanner construction knobs. Zero values mean "use the default".
#[derive(Debug, Clone, Default)]
pub struct ScannerOptions {
    pub check_timeout: Option<Duration>,
    pub check_host: Option<String>,
    pub check_port: Option<u16>,
    pub max_concurrent: Option<usize>,
    pub remark: Option<RemarkTemplate>,
}

pub struct Scanner {
    checker: Arc<Checker>,
    filler: Arc<Filler>,
    limit: Arc<Semaphore>,
    result_buffer: usize,
}

impl Scanner {
    pub fn new(
        engine: Arc<dyn ProxyEngine>,
        geo: Arc<dyn CountryResolver>,
        opts: ScannerOptions,
    ) -> Self {
        let timeout = opts.check_timeout.unwrap_or(checker::DEFAULT_CHECK_TIMEOUT);
        let host = opts
            .check_host
            .unwrap_or_else(|| checker::DEFAULT_CHECK_HOST.to_string());
        let port = opts.check_port.unwrap_or(checker::DEFAULT_CHECK_PORT);
        let max_concurrent = match opts.max_concurrent {
            Some(n) if n > 0 => n,
            _ => default_max_concurrent(),
        };
        debug!(max_concurrent, check = %format!("{host}:{port}"), "scanner configured");

        Self {
            checker: Arc::new(Checker::new(engine, timeout, host, port)),
            filler: Arc::new(Filler::new(geo, opts.remark.unwrap_or_default())),
            limit: Arc::new(Semaphore::new(max_concurrent)),
            result_buffer: 64,
        }
    }

    /// Fans `links` out over the checker and streams results back in
    /// completion order. The channel closes once every link has emitted.
    pub fn check_links(&self, links: Vec<String>) -> mpsc::Receiver<CheckResult> {
        let (tx, rx) = mpsc::channel(self.result_buffer);

        for link in links {
            let checker = Arc::clone(&self.checker);
            let filler = Arc::clone(&self.filler);
            let limit = Arc::clone(&self.limit);
            let tx = tx.clone();
            tokio::spawn(async move {
                // An acquire error means the semaphore closed, which only
                // happens at teardown; dropping the result is fine then.
                let Ok(_permit) = limit.acquire_owned().await else {
                    return;
                };
                let result = check_one(&checker, &filler, link).await;
                let _ = tx.send(result).await;
            });
        }

        rx
    }

    /// Convenience for the CLI path: collect and sort, successes first by
    /// ascending delay.
    pub async fn check_links_collect(&self, links: Vec<String>) -> Vec<CheckResult> {
        let mut rx = self.check_links(links);
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        sort_results(&mut results);
        results
    }
}

async fn check_one(checker: &Checker, filler: &Filler, link: String) -> CheckResult {
    let mut result = CheckResult { raw: link.clone(), ..Default::default() };

    let parsed = match parser::parse(&link) {
        Ok(parsed) => parsed,
        Err(e) => {
            result.status = CheckStatus::Error;
            result.error = e.to_string();
            return result;
        }
    };
    result.protocol = Some(parsed.protocol());
    result.server = parsed.server().to_string();

    match checker.check(&parsed).await {
        Ok(delay) => {
            result.delay_ms = delay.as_millis() as u64;
            filler.fill(&mut result).await;
        }
        Err(e) => {
            result.status = CheckStatus::Error;
            result.error = e.to_string();
        }
    }

    result
}

/// Successes first, then ascending delay; failures keep their order.
pub fn sort_results(results: &mut [CheckResult]) {
    results.sort_by(|a, b| {
        let a_ok = a.status == CheckStatus::Success;
        let b_ok = b.status == CheckStatus::Success;
        match (a_ok, b_ok) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => std::cmp::Ordering::Equal,
            (true, true) => a.delay_ms.cmp(&b.delay_ms),
        }
    });
}

/// Concurrency ceiling from machine shape: 500 in-flight checks per CPU,
/// capped at 80% of the file-descriptor limit, floored at 100.
fn default_max_concurrent() -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let cpu_limit = cpus * 500;

    let fd_cap = (fd_limit() as f64 * 0.8) as usize;
    cpu_limit.clamp(100, fd_cap.max(100))
}

#[cfg(unix)]
fn fd_limit() -> u64 {
    let mut rl = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    // SAFETY: getrlimit writes into the struct we own and nothing else.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) };
    if rc == 0 {
        rl.rlim_cur
    } else {
        1024
    }
}

#[cfg(not(unix))]
fn fd_limit() -> u64 {
    1024
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::engine::DirectEngine;
    use super::*;

    struct NoCountry;

    #[async_trait::async_trait]
    impl CountryResolver for NoCountry {
        async fn country_code(&self, _ip: std::net::IpAddr) -> Option<String> {
            None
        }
    }

    async fn echo_target() -> std::net::SocketAddr {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    if let Ok(n) = socket.read(&mut buf).await {
                        let _ = socket.write_all(&buf[..n]).await;
                    }
                });
            }
        });
        addr
    }

    fn scanner_for(addr: std::net::SocketAddr) -> Arc<Scanner> {
        Arc::new(Scanner::new(
            Arc::new(DirectEngine),
            Arc::new(NoCountry),
            ScannerOptions {
                check_timeout: Some(Duration::from_secs(2)),
                check_host: Some("127.0.0.1".to_string()),
                check_port: Some(addr.port()),
                max_concurrent: Some(8),
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn mixed_batch_emits_one_result_per_link() {
        let addr = echo_target().await;
        let scanner = scanner_for(addr);

        let links = vec![
            "vmess://!!!".to_string(),
            "ss://YWVzLTI1Ni1nY206cGFzcw@1.2.3.4:8388#n".to_string(),
            "foo://bar".to_string(),
        ];
        let mut rx = scanner.check_links(links);

        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        assert_eq!(results.len(), 3);

        let errors = results.iter().filter(|r| r.status == CheckStatus::Error).count();
        let successes = results.iter().filter(|r| r.status == CheckStatus::Success).count();
        assert_eq!(errors, 2);
        assert_eq!(successes, 1);

        // Parse failures keep the original link text untouched.
        let bad = results.iter().find(|r| r.raw == "vmess://!!!").unwrap();
        assert!(bad.protocol.is_none());
        assert!(!bad.error.is_empty());
    }

    #[tokio::test]
    async fn successful_result_is_filled() {
        let addr = echo_target().await;
        let scanner = scanner_for(addr);

        let results = scanner
            .check_links_collect(vec![
                "trojan://pw@example.com:443?security=tls#old".to_string(),
            ])
            .await;
        let result = &results[0];
        assert_eq!(result.status, CheckStatus::Success);
        assert_eq!(result.protocol, Some(Protocol::Trojan));
        assert_eq!(result.server, "example.com");
        assert!(result.remark.contains("✨"));
        assert!(result.raw.ends_with(&urlencoding::encode(&result.remark).into_owned()));
    }

    #[tokio::test]
    async fn collect_sorts_successes_first_by_delay() {
        let mut results = vec![
            CheckResult { status: CheckStatus::Error, ..Default::default() },
            CheckResult { status: CheckStatus::Success, delay_ms: 40, ..Default::default() },
            CheckResult { status: CheckStatus::Success, delay_ms: 10, ..Default::default() },
        ];
        sort_results(&mut results);
        assert_eq!(results[0].delay_ms, 10);
        assert_eq!(results[1].delay_ms, 40);
        assert_eq!(results[2].status, CheckStatus::Error);
    }

    #[test]
    fn max_concurrent_is_clamped() {
        let n = default_max_concurrent();
        assert!(n >= 100);
        assert!(n as u64 <= fd_limit().max(125));
    }
}
