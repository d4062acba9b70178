//! Telegram notification sidecar.
//!
//! Best-effort publisher of working configurations to a channel. One
//! message per configured interval; submissions beyond the small buffer
//! are dropped on the floor. Nothing here ever blocks or fails a scan.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::CheckResult;

/// Results slower than this are not worth announcing.
const MAX_ANNOUNCED_DELAY_MS: u64 = 3000;
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const BUFFER: usize = 64;

const DEFAULT_TEMPLATE: &str =
    "{remark}\n\n<code>{config}</code>\n\n⏱ {delay_ms}ms";

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub channel: String,
    pub template: String,
    pub proxy_url: String,
    pub sending_interval: Duration,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Handle for submitting results. Cheap to clone.
#[derive(Clone)]
pub struct Telegram {
    tx: mpsc::Sender<CheckResult>,
}

impl Telegram {
    /// Spawns the rate-limited sender. Returns `None` when the sidecar is
    /// not configured.
    pub fn spawn(settings: TelegramSettings) -> Option<Self> {
        if settings.bot_token.is_empty() || settings.channel.is_empty() {
            return None;
        }

        let mut builder = reqwest::Client::builder().timeout(SEND_TIMEOUT);
        if !settings.proxy_url.is_empty() {
            match reqwest::Proxy::all(&settings.proxy_url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => {
                    warn!(error = %e, "invalid telegram proxy url, sending directly");
                }
            }
        }
        let client = match builder.build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "telegram client construction failed, sidecar disabled");
                return None;
            }
        };

        let (tx, rx) = mpsc::channel(BUFFER);
        tokio::spawn(sender_loop(settings, client, rx));
        Some(Self { tx })
    }

    /// Queues a result for announcement. Slow results and overruns are
    /// silently dropped.
    pub fn notify(&self, result: &CheckResult) {
        if result.delay_ms > MAX_ANNOUNCED_DELAY_MS {
            return;
        }
        if self.tx.try_send(result.clone()).is_err() {
            debug!("telegram buffer full, dropping notification");
        }
    }
}

async fn sender_loop(
    settings: TelegramSettings,
    client: reqwest::Client,
    mut rx: mpsc::Receiver<CheckResult>,
) {
    let interval = settings.sending_interval.max(Duration::from_millis(100));
    let mut tick = tokio::time::interval(interval);
    let url = format!("https://api.telegram.org/bot{}/sendMessage", settings.bot_token);
    let template = if settings.template.is_empty() {
        DEFAULT_TEMPLATE.to_string()
    } else {
        settings.template.clone()
    };

    while let Some(result) = rx.recv().await {
        tick.tick().await;
        let text = render(&template, &result);
        let body = SendMessage { chat_id: &settings.channel, text: &text, parse_mode: "HTML" };

        match client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(server = %result.server, "telegram notification sent");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "telegram API rejected the message");
            }
            Err(e) => {
                warn!(error = %e, "telegram send failed");
            }
        }
    }
}

/// Placeholder substitution: `{remark}`, `{protocol}`, `{delay_ms}`,
/// `{country}`, `{server}`, `{config}`.
fn render(template: &str, result: &CheckResult) -> String {
    template
        .replace("{remark}", &result.remark)
        .replace(
            "{protocol}",
            result.protocol.map(|p| p.as_str()).unwrap_or("unknown"),
        )
        .replace("{delay_ms}", &result.delay_ms.to_string())
        .replace("{country}", &result.country_code)
        .replace("{server}", &result.server)
        .replace("{config}", &result.raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::Protocol;
    use crate::core::CheckStatus;

    fn sample() -> CheckResult {
        CheckResult {
            status: CheckStatus::Success,
            protocol: Some(Protocol::Vless),
            raw: "vless://uuid@h:443#r".to_string(),
            delay_ms: 120,
            remark: "✨ Org".to_string(),
            server: "h".to_string(),
            country_code: "DE".to_string(),
            error: String::new(),
        }
    }

    #[test]
    fn render_substitutes_placeholders() {
        let text = render("{remark} {protocol} {delay_ms} {country} {server}", &sample());
        assert_eq!(text, "✨ Org vless 120 DE h");
    }

    #[test]
    fn default_template_includes_the_config() {
        let text = render(DEFAULT_TEMPLATE, &sample());
        assert!(text.contains("vless://uuid@h:443#r"));
        assert!(text.contains("120ms"));
    }

    #[test]
    fn unconfigured_sidecar_is_disabled() {
        let settings = TelegramSettings {
            bot_token: String::new(),
            channel: String::new(),
            template: String::new(),
            proxy_url: String::new(),
            sending_interval: Duration::from_secs(10),
        };
        // No runtime here; spawn must bail before reaching tokio::spawn.
        assert!(Telegram::spawn(settings).is_none());
    }
}
