//! Trojan link parsing.
//!
//! `trojan://password@host:port?query#remark`. TLS is the protocol's
//! default security; `peer` is accepted as an alias for `sni`, and both
//! `allowInsecure` and `skipCertVerify` toggle certificate checks off.

use std::collections::HashMap;

use url::Url;

use super::ParseError;

/// Parsed `trojan://` configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TrojanLink {
    pub server: String,
    pub port: u16,
    pub password: String,
    pub sni: String,
    pub alpn: String,
    pub network: String,
    pub header_type: String,
    pub host: String,
    pub path: String,
    pub mode: String,
    pub authority: String,
    pub service_name: String,
    pub security: String,
    pub allow_insecure: bool,
    pub remark: String,
}

pub(super) fn parse(link: &str) -> Result<TrojanLink, ParseError> {
    let url = Url::parse(link).map_err(|_| ParseError::MissingField("server"))?;

    let password = urlencoding::decode(url.username())
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| url.username().to_string());
    if password.is_empty() {
        return Err(ParseError::MissingField("password"));
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
    let flag = |key: &str| {
        let v = param(key);
        v == "1" || v == "true"
    };

    let sni = {
        let s = param("sni");
        if s.is_empty() { param("peer") } else { s }
    };
    let network = {
        let n = param("type");
        if n.is_empty() { "tcp".to_string() } else { n }
    };
    let security = {
        let s = param("security");
        if s.is_empty() { "tls".to_string() } else { s }
    };

    let remark = url
        .fragment()
        .map(|f| urlencoding::decode(f).map(|s| s.into_owned()).unwrap_or_else(|_| f.to_string()))
        .unwrap_or_default();

    Ok(TrojanLink {
        server,
        port,
        password,
        sni,
        alpn: param("alpn"),
        network,
        header_type: param("headerType"),
        host: param("host"),
        path: param("path"),
        mode: param("mode"),
        authority: param("authority"),
        service_name: param("serviceName"),
        security,
        allow_insecure: flag("allowInsecure") || flag("skipCertVerify"),
        remark,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_link() {
        let parsed = parse("trojan://pw@h:443?security=tls&type=tcp").unwrap();
        assert_eq!(parsed.server, "h");
        assert_eq!(parsed.port, 443);
        assert_eq!(parsed.password, "pw");
        assert_eq!(parsed.security, "tls");
        assert_eq!(parsed.network, "tcp");
        assert!(!parsed.allow_insecure);
    }

    #[test]
    fn defaults_security_to_tls() {
        let parsed = parse("trojan://pw@h:443").unwrap();
        assert_eq!(parsed.security, "tls");
        assert_eq!(parsed.network, "tcp");
    }

    #[test]
    fn allow_insecure_flags() {
        assert!(parse("trojan://pw@h:443?allowInsecure=1").unwrap().allow_insecure);
        assert!(parse("trojan://pw@h:443?allowInsecure=true").unwrap().allow_insecure);
        assert!(parse("trojan://pw@h:443?skipCertVerify=1").unwrap().allow_insecure);
        assert!(!parse("trojan://pw@h:443?allowInsecure=0").unwrap().allow_insecure);
    }

    #[test]
    fn peer_is_an_sni_alias() {
        let parsed = parse("trojan://pw@h:443?peer=example.com").unwrap();
        assert_eq!(parsed.sni, "example.com");

        let parsed = parse("trojan://pw@h:443?sni=a&peer=b").unwrap();
        assert_eq!(parsed.sni, "a");
    }

    #[test]
    fn rejects_missing_password() {
        assert_eq!(
            parse("trojan://h:443"),
            Err(ParseError::MissingField("password"))
        );
    }

    #[test]
    fn rejects_missing_port() {
        assert!(matches!(parse("trojan://pw@h"), Err(ParseError::BadPort(_))));
    }

    #[test]
    fn decodes_fragment_remark() {
        let parsed = parse("trojan://pw@h:443#old%20name").unwrap();
        assert_eq!(parsed.remark, "old name");
    }
}
