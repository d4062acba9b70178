//! VLESS link parsing.
//!
//! `vless://<uuid>@host:port?query#remark`. The protocol only supports
//! `encryption=none`; anything else is rejected outright.

use std::collections::HashMap;

use url::Url;

use super::ParseError;

/// Parsed `vless://` configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VlessLink {
    pub server: String,
    pub port: u16,
    pub id: String,
    pub encryption: String,
    pub flow: String,
    /// `tls`, `reality`, or empty for plain.
    pub security: String,
    pub sni: String,
    pub alpn: String,
    pub network: String,
    pub header_type: String,
    pub host: String,
    pub path: String,
    pub mode: String,
    pub authority: String,
    pub service_name: String,
    pub remark: String,
}

pub(super) fn parse(link: &str) -> Result<VlessLink, ParseError> {
    let url = Url::parse(link).map_err(|_| ParseError::MissingField("server"))?;

    let id = urlencoding::decode(url.username())
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| url.username().to_string());
    if id.is_empty() {
        return Err(ParseError::MissingField("id"));
    }

    // host_str keeps IPv6 brackets; the stored server is the bare address.
    let server = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(ParseError::MissingField("server"))?
        .trim_matches(['[', ']'])
        .to_string();
    let port = match url.port() {
        Some(0) | None => return Err(ParseError::BadPort(link.to_string())),
        Some(p) => p,
    };

    let params: HashMap<String, String> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let param = |key: &str| params.get(key).cloned().unwrap_or_default();

    let encryption = {
        let e = param("encryption");
        if e.is_empty() { "none".to_string() } else { e }
    };
    if encryption != "none" {
        return Err(ParseError::UnsupportedEncryption(encryption));
    }

    let network = {
        let n = param("type");
        if n.is_empty() { "tcp".to_string() } else { n }
    };

    let remark = url
        .fragment()
        .map(|f| urlencoding::decode(f).map(|s| s.into_owned()).unwrap_or_else(|_| f.to_string()))
        .unwrap_or_default();

    Ok(VlessLink {
        server,
        port,
        id,
        encryption,
        flow: param("flow"),
        security: param("security"),
        sni: param("sni"),
        alpn: param("alpn"),
        network,
        header_type: param("headerType"),
        host: param("host"),
        path: param("path"),
        mode: param("mode"),
        authority: param("authority"),
        service_name: param("serviceName"),
        remark,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_link() {
        let link = "vless://9a4b1f-uuid@example.com:443?encryption=none&security=tls&type=ws&path=/ws&host=cdn.example.com&sni=example.com#my%20node";
        let parsed = parse(link).unwrap();
        assert_eq!(parsed.id, "9a4b1f-uuid");
        assert_eq!(parsed.server, "example.com");
        assert_eq!(parsed.port, 443);
        assert_eq!(parsed.security, "tls");
        assert_eq!(parsed.network, "ws");
        assert_eq!(parsed.path, "/ws");
        assert_eq!(parsed.host, "cdn.example.com");
        assert_eq!(parsed.remark, "my node");
    }

    #[test]
    fn defaults_encryption_and_network() {
        let parsed = parse("vless://uuid@h:443").unwrap();
        assert_eq!(parsed.encryption, "none");
        assert_eq!(parsed.network, "tcp");
        assert_eq!(parsed.security, "");
    }

    #[test]
    fn rejects_non_none_encryption() {
        let result = parse("vless://uuid@h:443?encryption=aes-128-gcm");
        assert_eq!(
            result,
            Err(ParseError::UnsupportedEncryption("aes-128-gcm".to_string()))
        );
    }

    #[test]
    fn rejects_missing_id() {
        assert_eq!(parse("vless://h:443"), Err(ParseError::MissingField("id")));
    }

    #[test]
    fn rejects_missing_port() {
        assert!(matches!(
            parse("vless://uuid@h"),
            Err(ParseError::BadPort(_))
        ));
    }

    #[test]
    fn grpc_params() {
        let link = "vless://uuid@h:443?type=grpc&serviceName=svc&authority=a&mode=multi";
        let parsed = parse(link).unwrap();
        assert_eq!(parsed.network, "grpc");
        assert_eq!(parsed.service_name, "svc");
        assert_eq!(parsed.authority, "a");
        assert_eq!(parsed.mode, "multi");
    }

    #[test]
    fn ipv6_host() {
        let parsed = parse("vless://uuid@[2001:db8::1]:443").unwrap();
        assert_eq!(parsed.server, "2001:db8::1");
        assert_eq!(parsed.port, 443);
    }
}
