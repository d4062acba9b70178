//! Proxy link parsing.
//!
//! Turns one URI-form link (`vmess://`, `vless://`, `trojan://`, `ss://`)
//! into a typed configuration, or reports why it cannot. Dispatch is a
//! closed enum rather than a registry of boxed parsers so that adding a
//! scheme is a compile error everywhere it matters.

pub mod base64;

mod shadowsocks;
mod trojan;
mod vless;
mod vmess;

pub use shadowsocks::ShadowsocksLink;
pub use trojan::TrojanLink;
pub use vless::VlessLink;
pub use vmess::VmessLink;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported link schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    #[serde(rename = "ss")]
    Shadowsocks,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "ss",
        }
    }

    /// Icon used in generated remarks.
    pub fn icon(&self) -> &'static str {
        match self {
            Protocol::Vmess => "⚡",
            Protocol::Vless => "🚀",
            Protocol::Trojan => "🛡️",
            Protocol::Shadowsocks => "🔒",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a link failed to parse. All variants are non-retryable: the link is
/// surfaced as a per-link error and never contributes to the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unsupported link scheme")]
    BadScheme,
    #[error("invalid base64 payload")]
    BadBase64,
    #[error("invalid embedded JSON: {0}")]
    BadJson(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid port: {0}")]
    BadPort(String),
    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),
}

/// A parsed proxy configuration, tagged by scheme.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLink {
    Vmess(VmessLink),
    Vless(VlessLink),
    Trojan(TrojanLink),
    Shadowsocks(ShadowsocksLink),
}

impl ParsedLink {
    pub fn protocol(&self) -> Protocol {
        match self {
            ParsedLink::Vmess(_) => Protocol::Vmess,
            ParsedLink::Vless(_) => Protocol::Vless,
            ParsedLink::Trojan(_) => Protocol::Trojan,
            ParsedLink::Shadowsocks(_) => Protocol::Shadowsocks,
        }
    }

    pub fn server(&self) -> &str {
        match self {
            ParsedLink::Vmess(c) => &c.server,
            ParsedLink::Vless(c) => &c.server,
            ParsedLink::Trojan(c) => &c.server,
            ParsedLink::Shadowsocks(c) => &c.server,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            ParsedLink::Vmess(c) => c.port,
            ParsedLink::Vless(c) => c.port,
            ParsedLink::Trojan(c) => c.port,
            ParsedLink::Shadowsocks(c) => c.port,
        }
    }
}

/// Parses one link. The scheme is matched case-insensitively; everything
/// after `://` is handed to the scheme-specific parser untouched.
pub fn parse(link: &str) -> Result<ParsedLink, ParseError> {
    let link = link.trim();
    let sep = link.find("://").ok_or(ParseError::BadScheme)?;
    let scheme = link[..sep].to_ascii_lowercase();
    let body = &link[sep + 3..];

    match scheme.as_str() {
        "vmess" => vmess::parse(body).map(ParsedLink::Vmess),
        "vless" => vless::parse(link).map(ParsedLink::Vless),
        "trojan" => trojan::parse(link).map(ParsedLink::Trojan),
        "ss" => shadowsocks::parse(body).map(ParsedLink::Shadowsocks),
        _ => Err(ParseError::BadScheme),
    }
}

/// Splits `host:port`, handling bracketed IPv6 addresses.
pub(crate) fn split_host_port(hostport: &str) -> Result<(String, u16), ParseError> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let bracket_end = rest
            .find(']')
            .ok_or_else(|| ParseError::BadPort(hostport.to_string()))?;
        let host = rest[..bracket_end].to_string();
        let port_str = rest
            .get(bracket_end + 2..)
            .ok_or_else(|| ParseError::BadPort(hostport.to_string()))?;
        return Ok((host, parse_port(port_str)?));
    }

    let colon = hostport
        .rfind(':')
        .ok_or_else(|| ParseError::BadPort(hostport.to_string()))?;
    let host = hostport[..colon].to_string();
    if host.is_empty() {
        return Err(ParseError::MissingField("server"));
    }
    Ok((host, parse_port(&hostport[colon + 1..])?))
}

/// Parses a port, rejecting 0 and anything outside u16.
pub(crate) fn parse_port(s: &str) -> Result<u16, ParseError> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(ParseError::BadPort(s.to_string())),
        Ok(p) => Ok(p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_scheme() {
        assert_eq!(parse("foo://bar"), Err(ParseError::BadScheme));
        assert_eq!(parse("not a link"), Err(ParseError::BadScheme));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let link = "SS://YWVzLTI1Ni1nY206cGFzcw@1.2.3.4:8388#n";
        let parsed = parse(link).unwrap();
        assert_eq!(parsed.protocol(), Protocol::Shadowsocks);
    }

    #[test]
    fn dispatches_by_scheme() {
        let parsed = parse("trojan://pw@h:443?security=tls&type=tcp").unwrap();
        assert_eq!(parsed.protocol(), Protocol::Trojan);
        assert_eq!(parsed.server(), "h");
        assert_eq!(parsed.port(), 443);
    }

    #[test]
    fn split_host_port_ipv4() {
        let (host, port) = split_host_port("example.com:8080").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 8080);
    }

    #[test]
    fn split_host_port_ipv6() {
        let (host, port) = split_host_port("[2001:db8::1]:443").unwrap();
        assert_eq!(host, "2001:db8::1");
        assert_eq!(port, 443);
    }

    #[test]
    fn split_host_port_rejects_bad_input() {
        assert!(split_host_port("example.com").is_err());
        assert!(split_host_port("example.com:nope").is_err());
        assert!(split_host_port("example.com:0").is_err());
        assert!(split_host_port("[::1:443").is_err());
    }
}
