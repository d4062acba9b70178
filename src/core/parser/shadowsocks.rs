//! Shadowsocks link parsing.
//!
//! Two shapes occur in the wild:
//! - SIP002: `ss://base64(method:password)@host:port#remark` (the userinfo
//!   may also be plain `method:password`)
//! - legacy: `ss://base64(method:password@host:port)#remark`

use super::base64::decode_any_utf8;
use super::{split_host_port, ParseError};

/// Parsed `ss://` configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowsocksLink {
    pub server: String,
    pub port: u16,
    pub method: String,
    pub password: String,
    pub remark: String,
}

pub(super) fn parse(body: &str) -> Result<ShadowsocksLink, ParseError> {
    // Fragment first: everything after the last '#' is the remark.
    let (main, remark) = match body.rfind('#') {
        Some(pos) => {
            let raw = &body[pos + 1..];
            let remark = urlencoding::decode(raw)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            (&body[..pos], remark)
        }
        None => (body, String::new()),
    };
    // Tolerate a trailing '/' before the fragment (ss://...:9/#x).
    let main = main.strip_suffix('/').unwrap_or(main);

    let (method, password, server, port) = match main.rfind('@') {
        Some(at) => {
            let (method, password) = parse_userinfo(&main[..at])?;
            let (server, port) = split_host_port(&main[at + 1..])?;
            (method, password, server, port)
        }
        None => {
            // Legacy form: the entire body is base64.
            let decoded = decode_any_utf8(main).ok_or(ParseError::BadBase64)?;
            let at = decoded.rfind('@').ok_or(ParseError::MissingField("server"))?;
            let (method, password) = split_method_password(&decoded[..at])?;
            let (server, port) = split_host_port(&decoded[at + 1..])?;
            (method, password, server, port)
        }
    };

    if method.is_empty() {
        return Err(ParseError::MissingField("method"));
    }
    if password.is_empty() {
        return Err(ParseError::MissingField("password"));
    }

    Ok(ShadowsocksLink { server, port, method, password, remark })
}

/// Userinfo is either base64(method:password) or plain method:password.
fn parse_userinfo(userinfo: &str) -> Result<(String, String), ParseError> {
    if let Some(decoded) = decode_any_utf8(userinfo) {
        if decoded.contains(':') {
            return split_method_password(&decoded);
        }
    }

    let plain = urlencoding::decode(userinfo)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| userinfo.to_string());
    split_method_password(&plain)
}

fn split_method_password(s: &str) -> Result<(String, String), ParseError> {
    let colon = s.find(':').ok_or(ParseError::MissingField("password"))?;
    Ok((s[..colon].to_string(), s[colon + 1..].to_string()))
}

#[cfg(test)]
mod tests {
    use super::super::base64::encode_std;
    use super::*;

    #[test]
    fn parses_sip002() {
        // base64("aes-256-gcm:pass"), raw (unpadded)
        let parsed = parse("YWVzLTI1Ni1nY206cGFzcw@1.2.3.4:8388#n").unwrap();
        assert_eq!(parsed.method, "aes-256-gcm");
        assert_eq!(parsed.password, "pass");
        assert_eq!(parsed.server, "1.2.3.4");
        assert_eq!(parsed.port, 8388);
        assert_eq!(parsed.remark, "n");
    }

    #[test]
    fn parses_legacy_whole_body() {
        let body = encode_std(b"aes-256-gcm:pass@1.2.3.4:8388");
        let parsed = parse(&body).unwrap();
        assert_eq!(parsed.method, "aes-256-gcm");
        assert_eq!(parsed.password, "pass");
        assert_eq!(parsed.server, "1.2.3.4");
        assert_eq!(parsed.port, 8388);
    }

    #[test]
    fn parses_plain_userinfo() {
        let parsed = parse("chacha20-ietf-poly1305:secret@example.com:443").unwrap();
        assert_eq!(parsed.method, "chacha20-ietf-poly1305");
        assert_eq!(parsed.password, "secret");
    }

    #[test]
    fn password_may_contain_colons() {
        let body = encode_std(b"aes-256-gcm:pa:ss@h:8388");
        let parsed = parse(&body).unwrap();
        assert_eq!(parsed.password, "pa:ss");
    }

    #[test]
    fn tolerates_trailing_slash() {
        let parsed = parse("YWVzLTI1Ni1nY206cGFzcw@127.0.0.1:9/#x").unwrap();
        assert_eq!(parsed.server, "127.0.0.1");
        assert_eq!(parsed.port, 9);
        assert_eq!(parsed.remark, "x");
    }

    #[test]
    fn rejects_undecodable_body() {
        assert_eq!(parse("!!!not-base64!!!"), Err(ParseError::BadBase64));
    }

    #[test]
    fn rejects_missing_auth() {
        let body = encode_std(b"just-a-method@h:8388");
        assert_eq!(parse(&body), Err(ParseError::MissingField("password")));
    }

    #[test]
    fn ipv6_server() {
        let parsed = parse("YWVzLTI1Ni1nY206cGFzcw@[::1]:8388").unwrap();
        assert_eq!(parsed.server, "::1");
        assert_eq!(parsed.port, 8388);
    }
}
