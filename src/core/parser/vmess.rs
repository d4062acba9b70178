//! VMess link parsing.
//!
//! The body of a `vmess://` link is base64-encoded JSON. Numeric fields
//! (`port`, `aid`) are frequently strings in the wild, so deserialization
//! coerces both forms.

use serde::{Deserialize, Deserializer};

use super::base64::decode_any;
use super::{parse_port, ParseError};

/// Parsed `vmess://` configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VmessLink {
    pub server: String,
    pub port: u16,
    pub id: String,
    pub alter_id: u32,
    /// Cipher selection, `auto` when the link does not name one.
    pub security: String,
    /// Transport network: tcp, ws, grpc, h2, kcp, quic.
    pub network: String,
    /// Header type for tcp/kcp/quic transports.
    pub header_type: String,
    pub host: String,
    pub path: String,
    pub tls: bool,
    pub sni: String,
    pub remark: String,
}

/// Wire shape of the embedded JSON document.
#[derive(Deserialize)]
struct VmessBody {
    #[serde(default)]
    add: String,
    #[serde(default, deserialize_with = "string_or_number")]
    port: u64,
    #[serde(default)]
    id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    aid: u64,
    #[serde(default)]
    scy: String,
    #[serde(default)]
    net: String,
    #[serde(default, rename = "type")]
    header_type: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    tls: String,
    #[serde(default)]
    sni: String,
    #[serde(default)]
    ps: String,
}

pub(super) fn parse(body: &str) -> Result<VmessLink, ParseError> {
    let decoded = decode_any(body).ok_or(ParseError::BadBase64)?;
    let body: VmessBody =
        serde_json::from_slice(&decoded).map_err(|e| ParseError::BadJson(e.to_string()))?;

    if body.add.is_empty() {
        return Err(ParseError::MissingField("add"));
    }
    if body.id.is_empty() {
        return Err(ParseError::MissingField("id"));
    }
    let port = parse_port(&body.port.to_string())?;

    let security = if body.scy.is_empty() { "auto".to_string() } else { body.scy };
    let network = if body.net.is_empty() { "tcp".to_string() } else { body.net };
    let header_type = if body.header_type.is_empty() {
        "none".to_string()
    } else {
        body.header_type
    };

    Ok(VmessLink {
        server: body.add,
        port,
        id: body.id,
        alter_id: body.aid as u32,
        security,
        network,
        header_type,
        host: body.host,
        path: body.path,
        tls: body.tls == "tls",
        sni: body.sni,
        remark: body.ps,
    })
}

/// Accepts `443`, `"443"`, `null`, or an absent field (-> 0).
fn string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Number(u64),
        String(String),
        Null,
    }

    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(n),
        Value::String(s) if s.is_empty() => Ok(0),
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        Value::Null => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::super::base64::encode_std;
    use super::*;

    fn encode(json: &str) -> String {
        encode_std(json.as_bytes())
    }

    #[test]
    fn parses_basic_link() {
        let body = encode(
            r#"{"v":"2","ps":"node","add":"example.com","port":443,"id":"uuid-1","aid":0}"#,
        );
        let link = parse(&body).unwrap();
        assert_eq!(link.server, "example.com");
        assert_eq!(link.port, 443);
        assert_eq!(link.id, "uuid-1");
        assert_eq!(link.remark, "node");
        assert_eq!(link.security, "auto");
        assert_eq!(link.network, "tcp");
        assert_eq!(link.header_type, "none");
        assert!(!link.tls);
    }

    #[test]
    fn coerces_string_port_and_aid() {
        let body = encode(
            r#"{"ps":"x","add":"h","port":"8443","id":"uuid","aid":"2","net":"ws","tls":"tls"}"#,
        );
        let link = parse(&body).unwrap();
        assert_eq!(link.port, 8443);
        assert_eq!(link.alter_id, 2);
        assert_eq!(link.network, "ws");
        assert!(link.tls);
    }

    #[test]
    fn rejects_bad_base64() {
        assert_eq!(parse("!!!"), Err(ParseError::BadBase64));
    }

    #[test]
    fn rejects_non_json_payload() {
        let body = encode("not json at all");
        assert!(matches!(parse(&body), Err(ParseError::BadJson(_))));
    }

    #[test]
    fn rejects_missing_fields() {
        let no_server = encode(r#"{"port":443,"id":"uuid"}"#);
        assert_eq!(parse(&no_server), Err(ParseError::MissingField("add")));

        let no_id = encode(r#"{"add":"h","port":443}"#);
        assert_eq!(parse(&no_id), Err(ParseError::MissingField("id")));

        let no_port = encode(r#"{"add":"h","id":"uuid"}"#);
        assert!(matches!(parse(&no_port), Err(ParseError::BadPort(_))));
    }

    #[test]
    fn accepts_url_safe_body() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        let body =
            URL_SAFE_NO_PAD.encode(r#"{"add":"h","port":443,"id":"uuid"}"#.as_bytes());
        assert!(parse(&body).is_ok());
    }
}
