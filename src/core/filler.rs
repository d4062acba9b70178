//! Result filling.
//!
//! After a successful check the link gets a canonical remark — org tag,
//! protocol icon, host, country flag — and the link text itself is
//! rewritten to carry it: VMess links re-encode the embedded JSON with a
//! new `ps`, URI-form links get their fragment replaced.

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use super::geoip::CountryResolver;
use super::parser::base64::{decode_any, encode_std};
use super::parser::Protocol;
use super::CheckResult;

/// How remarks are rendered.
#[derive(Debug, Clone)]
pub struct RemarkTemplate {
    pub org_name: String,
    pub separator: String,
    pub show_country: bool,
    pub show_host: bool,
    pub show_protocol: bool,
}

impl Default for RemarkTemplate {
    fn default() -> Self {
        Self {
            org_name: "NamiraNet".to_string(),
            separator: " | ".to_string(),
            show_country: true,
            show_host: true,
            show_protocol: true,
        }
    }
}

pub struct Filler {
    geo: Arc<dyn CountryResolver>,
    template: RemarkTemplate,
}

impl Filler {
    pub fn new(geo: Arc<dyn CountryResolver>, template: RemarkTemplate) -> Self {
        Self { geo, template }
    }

    /// Rewrites `result` in place: remark, server, country code, and the
    /// canonical raw link. Expects a success result whose `raw` is the
    /// original link.
    pub async fn fill(&self, result: &mut CheckResult) {
        let Some(protocol) = result.protocol else { return };
        match protocol {
            Protocol::Vmess => self.fill_vmess(result).await,
            Protocol::Vless | Protocol::Trojan | Protocol::Shadowsocks => {
                self.fill_uri(result, protocol).await
            }
        }
    }

    async fn fill_vmess(&self, result: &mut CheckResult) {
        let Some(body) = result.raw.strip_prefix("vmess://") else { return };
        let Some(decoded) = decode_any(body) else { return };
        let Ok(Value::Object(mut fields)) = serde_json::from_slice::<Value>(&decoded) else {
            return;
        };

        let server = fields
            .get("add")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (remark, country) = self.generate_remark(&server, Protocol::Vmess).await;

        fields.insert("ps".to_string(), Value::String(remark.clone()));
        if let Ok(encoded) = serde_json::to_vec(&fields) {
            result.raw = format!("vmess://{}", encode_std(&encoded));
        }
        result.server = server;
        result.remark = remark;
        result.country_code = country;
    }

    async fn fill_uri(&self, result: &mut CheckResult, protocol: Protocol) {
        // Canonical form drops everything from the first '#' on, so the
        // appended remark is the only fragment.
        let base = match result.raw.find('#') {
            Some(pos) => result.raw[..pos].to_string(),
            None => result.raw.clone(),
        };

        let server = extract_server(&base);
        let (remark, country) = self.generate_remark(&server, protocol).await;

        result.raw = format!("{base}#{}", urlencoding::encode(&remark));
        result.server = server;
        result.remark = remark;
        result.country_code = country;
    }

    async fn generate_remark(&self, server: &str, protocol: Protocol) -> (String, String) {
        let mut parts = vec![format!("✨ {}", self.template.org_name)];

        if self.template.show_protocol {
            parts.push(protocol.icon().to_string());
        }

        if self.template.show_host && !server.is_empty() {
            parts.push(format!("🌐 {server}"));
        }

        let mut country = String::new();
        if self.template.show_country {
            if let Some(code) = self.lookup_country(server).await {
                parts.push(match country_flag(&code) {
                    Some(flag) => flag,
                    None => format!("🏁 {code}"),
                });
                country = code;
            }
        }

        (parts.join(&self.template.separator), country)
    }

    /// Host → IP → country code, all best-effort.
    async fn lookup_country(&self, server: &str) -> Option<String> {
        if server.is_empty() {
            return None;
        }
        let ip = match server.trim_matches(['[', ']']).parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                let resolved = tokio::net::lookup_host((server, 0))
                    .await
                    .ok()?
                    .next()
                    .map(|addr| addr.ip())?;
                trace!(host = server, ip = %resolved, "resolved check host");
                resolved
            }
        };
        self.geo.country_code(ip).await
    }
}

/// Pulls the host out of a URI-form link without a full URL parse: strip
/// scheme, userinfo, then path/query, then the port.
fn extract_server(link: &str) -> String {
    let Some(sep) = link.find("://") else { return String::new() };
    let mut rest = &link[sep + 3..];

    if let Some(at) = rest.rfind('@') {
        rest = &rest[at + 1..];
    }
    if let Some(end) = rest.find(['/', '?', '#']) {
        rest = &rest[..end];
    }

    // Bracketed IPv6 keeps its brackets off; host:port drops the port.
    if let Some(v6) = rest.strip_prefix('[') {
        if let Some(close) = v6.find(']') {
            return v6[..close].to_string();
        }
    }
    match rest.rfind(':') {
        Some(colon) if rest[colon + 1..].chars().all(|c| c.is_ascii_digit()) => {
            rest[..colon].to_string()
        }
        _ => rest.to_string(),
    }
}

/// Regional-indicator flag for an alpha-2 code.
fn country_flag(code: &str) -> Option<String> {
    if code.len() != 2 {
        return None;
    }
    code.chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_uppercase() {
                char::from_u32(0x1F1E6 + (c as u32 - 'A' as u32))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::super::{CheckResult, CheckStatus};
    use super::*;

    struct FixedCountry(&'static str);

    #[async_trait]
    impl CountryResolver for FixedCountry {
        async fn country_code(&self, _ip: IpAddr) -> Option<String> {
            if self.0.is_empty() { None } else { Some(self.0.to_string()) }
        }
    }

    fn filler(country: &'static str) -> Filler {
        Filler::new(Arc::new(FixedCountry(country)), RemarkTemplate::default())
    }

    fn success(raw: &str, protocol: Protocol) -> CheckResult {
        CheckResult {
            status: CheckStatus::Success,
            protocol: Some(protocol),
            raw: raw.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn flags_from_alpha2() {
        assert_eq!(country_flag("DE").unwrap(), "🇩🇪");
        assert_eq!(country_flag("us").unwrap(), "🇺🇸");
        assert!(country_flag("DEU").is_none());
        assert!(country_flag("1!").is_none());
    }

    #[test]
    fn server_extraction() {
        assert_eq!(extract_server("trojan://pw@example.com:443?x=1#r"), "example.com");
        assert_eq!(extract_server("vless://uuid@1.2.3.4:443"), "1.2.3.4");
        assert_eq!(extract_server("vless://uuid@[2001:db8::1]:443"), "2001:db8::1");
        assert_eq!(extract_server("no-scheme"), "");
    }

    #[tokio::test]
    async fn uri_fill_replaces_fragment() {
        let mut result = success("vless://uuid@1.2.3.4:443?encryption=none#old", Protocol::Vless);
        filler("DE").fill(&mut result).await;

        assert_eq!(result.server, "1.2.3.4");
        assert_eq!(result.country_code, "DE");
        assert!(result.remark.contains("✨ NamiraNet"));
        assert!(result.remark.contains("🚀"));
        assert!(result.remark.contains("🌐 1.2.3.4"));
        assert!(result.remark.contains("🇩🇪"));

        // Exactly one '#', and the tail is the escaped remark.
        let hash = result.raw.rfind('#').unwrap();
        assert!(!result.raw[..hash].contains('#'));
        let tail = &result.raw[hash + 1..];
        assert_eq!(
            urlencoding::decode(tail).unwrap().into_owned(),
            result.remark
        );
    }

    #[tokio::test]
    async fn vmess_fill_rewrites_ps_and_preserves_fields() {
        let body = encode_std(
            br#"{"v":"2","ps":"old","add":"example.com","port":"443","id":"uuid","net":"ws","extra":"kept"}"#,
        );
        let mut result = success(&format!("vmess://{body}"), Protocol::Vmess);
        filler("NL").fill(&mut result).await;

        assert_eq!(result.server, "example.com");
        let rewritten = result.raw.strip_prefix("vmess://").unwrap();
        let decoded: Value =
            serde_json::from_slice(&decode_any(rewritten).unwrap()).unwrap();
        assert_eq!(decoded["ps"], Value::String(result.remark.clone()));
        assert_eq!(decoded["add"], "example.com");
        assert_eq!(decoded["port"], "443");
        assert_eq!(decoded["extra"], "kept");
        assert!(result.remark.contains("⚡"));
    }

    #[tokio::test]
    async fn missing_country_is_omitted() {
        let mut result = success("trojan://pw@10.0.0.1:443", Protocol::Trojan);
        filler("").fill(&mut result).await;

        assert_eq!(result.country_code, "");
        assert!(!result.remark.contains("🏁"));
        assert!(result.remark.contains("🛡️"));
    }

    #[tokio::test]
    async fn unmappable_code_uses_fallback_marker() {
        struct Weird;
        #[async_trait]
        impl CountryResolver for Weird {
            async fn country_code(&self, _ip: IpAddr) -> Option<String> {
                Some("X1".to_string())
            }
        }
        let filler = Filler::new(Arc::new(Weird), RemarkTemplate::default());
        let mut result = success("trojan://pw@10.0.0.1:443", Protocol::Trojan);
        filler.fill(&mut result).await;
        assert!(result.remark.contains("🏁 X1"));
    }
}
