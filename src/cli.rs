//! Command-line interface.
//!
//! `api` runs the service; `check` is a one-shot driver over the same
//! scan core, reading links from arguments, a file, or piped stdin.

use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use proxybox::config::Config;
use proxybox::core::engine::{DirectEngine, ProxyEngine, XrayEngine};
use proxybox::core::filler::RemarkTemplate;
use proxybox::core::{geoip, CheckResult, CheckStatus, Scanner, ScannerOptions};

#[derive(Parser)]
#[command(name = "proxybox", version, about = "Quality assurance for proxy configuration links")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Api(ApiArgs),
    /// Check links once and print the results
    Check(CheckArgs),
}

#[derive(Args)]
pub struct ApiArgs {
    /// Configuration file (defaults to config/proxybox.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Links to check (also read from --file and piped stdin)
    pub links: Vec<String>,

    /// File with one link per line
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Per-check timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Concurrency ceiling
    #[arg(long)]
    pub concurrent: Option<usize>,

    /// Plain TCP reachability instead of tunneling through the engine
    #[arg(long)]
    pub direct: bool,
}

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run_check(args: CheckArgs, config: Config) -> Result<(), AnyError> {
    let mut links = args.links.clone();
    if let Some(path) = &args.file {
        let file = std::fs::File::open(path)?;
        collect_lines(std::io::BufReader::new(file), &mut links)?;
    }
    if !std::io::stdin().is_terminal() {
        collect_lines(std::io::stdin().lock(), &mut links)?;
    }
    if links.is_empty() {
        return Err("no links given (arguments, --file, or stdin)".into());
    }

    let engine: Arc<dyn ProxyEngine> = if args.direct {
        Arc::new(DirectEngine)
    } else {
        Arc::new(XrayEngine::new(&config.app.xray_bin))
    };
    let (check_host, check_port) = config.app.check_target();
    let scanner = Arc::new(Scanner::new(
        engine,
        geoip::resolver_from(config.app.mmdb_path.as_deref()),
        ScannerOptions {
            check_timeout: Some(
                args.timeout
                    .map(std::time::Duration::from_secs)
                    .unwrap_or_else(|| config.app.check_timeout()),
            ),
            check_host: Some(check_host),
            check_port: Some(check_port),
            max_concurrent: args.concurrent,
            remark: Some(RemarkTemplate {
                org_name: config.app.org_name.clone(),
                separator: config.app.remark_separator.clone(),
                ..Default::default()
            }),
        },
    ));

    eprintln!("checking {} links...", links.len());
    let results = scanner.check_links_collect(links).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    print!("{}", render_table(&results));
    let working = results.iter().filter(|r| r.status == CheckStatus::Success).count();
    eprintln!("{working}/{} working", results.len());
    Ok(())
}

/// Fixed-width result table: header, separator rule, one row per link.
fn render_table(results: &[CheckResult]) -> String {
    let mut lines = Vec::with_capacity(results.len() + 2);

    lines.push(format!(
        "{:<8} {:<20} {:<10} {:<8} {:<10} {:<50}",
        "STATUS", "SERVER", "PROTOCOL", "COUNTRY", "DELAY(ms)", "ERROR"
    ));
    lines.push("-".repeat(120));

    for result in results {
        let delay = if result.delay_ms > 0 {
            result.delay_ms.to_string()
        } else {
            "N/A".to_string()
        };
        lines.push(format!(
            "{:<8} {:<20} {:<10} {:<8} {:<10} {:<50}",
            result.status.as_str(),
            truncate(&result.server, 20),
            result.protocol.map(|p| p.as_str()).unwrap_or(""),
            result.country_code,
            delay,
            truncate(&result.error, 50),
        ));
    }

    lines.join("\n") + "\n"
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn collect_lines<R: BufRead>(reader: R, links: &mut Vec<String>) -> std::io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            links.push(line.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proxybox::core::parser::Protocol;

    use super::*;

    #[test]
    fn table_has_header_rule_and_one_row_per_result() {
        let results = vec![
            CheckResult {
                status: CheckStatus::Success,
                protocol: Some(Protocol::Shadowsocks),
                raw: "ss://x".to_string(),
                delay_ms: 42,
                server: "1.2.3.4".to_string(),
                country_code: "DE".to_string(),
                ..Default::default()
            },
            CheckResult {
                status: CheckStatus::Error,
                protocol: Some(Protocol::Trojan),
                raw: "trojan://y".to_string(),
                error: "dial failed: connection refused".to_string(),
                ..Default::default()
            },
        ];

        let table = render_table(&results);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("STATUS"));
        assert!(lines[0].contains("SERVER"));
        assert!(lines[0].contains("PROTOCOL"));
        assert!(lines[0].contains("COUNTRY"));
        assert!(lines[0].contains("DELAY(ms)"));
        assert!(lines[0].contains("ERROR"));
        assert_eq!(lines[1], "-".repeat(120));

        assert!(lines[2].starts_with("success"));
        assert!(lines[2].contains("1.2.3.4"));
        assert!(lines[2].contains("DE"));
        assert!(lines[2].contains("42"));

        assert!(lines[3].starts_with("error"));
        assert!(lines[3].contains("trojan"));
        assert!(lines[3].contains("N/A"));
        assert!(lines[3].contains("dial failed"));
    }

    #[test]
    fn table_columns_line_up() {
        let results = vec![CheckResult {
            status: CheckStatus::Success,
            protocol: Some(Protocol::Vless),
            server: "example.com".to_string(),
            delay_ms: 7,
            ..Default::default()
        }];

        let table = render_table(&results);
        let lines: Vec<&str> = table.lines().collect();
        // Every column starts at the same offset in header and rows.
        let header_cols: Vec<usize> = ["STATUS", "SERVER", "PROTOCOL", "COUNTRY", "DELAY(ms)"]
            .iter()
            .map(|label| lines[0].find(label).unwrap())
            .collect();
        assert_eq!(lines[2].find("success").unwrap(), header_cols[0]);
        assert_eq!(lines[2].find("example.com").unwrap(), header_cols[1]);
        assert_eq!(lines[2].find("vless").unwrap(), header_cols[2]);
        assert_eq!(lines[2].find('7').unwrap(), header_cols[4]);
    }

    #[test]
    fn long_fields_are_truncated_with_ellipsis() {
        let long = "a-very-long-hostname-that-never-seems-to-end.example.com";
        assert_eq!(truncate(long, 20).chars().count(), 20);
        assert!(truncate(long, 20).ends_with("..."));
        assert_eq!(truncate("short", 20), "short");
    }
}
