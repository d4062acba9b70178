//! Outbound serialization.
//!
//! Renders a parsed link into the `{protocol, settings, streamSettings}`
//! JSON object the proxy engine consumes. Stream settings are shared
//! across the stream-capable protocols; Shadowsocks carries none.

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::parser::{ParsedLink, ShadowsocksLink, TrojanLink, VlessLink, VmessLink};

#[derive(Serialize)]
struct OutboundConfig {
    protocol: &'static str,
    settings: Value,
    #[serde(rename = "streamSettings", skip_serializing_if = "Option::is_none")]
    stream_settings: Option<Value>,
}

/// Everything the stream-settings builder needs, independent of protocol.
#[derive(Default)]
struct StreamParams<'a> {
    network: &'a str,
    header_type: &'a str,
    host: &'a str,
    path: &'a str,
    mode: &'a str,
    authority: &'a str,
    service_name: &'a str,
    tls: bool,
    sni: &'a str,
    alpn: &'a str,
    allow_insecure: bool,
    server: &'a str,
}

/// Renders the outbound JSON for one parsed link.
pub fn render(link: &ParsedLink) -> Result<Value, serde_json::Error> {
    let config = match link {
        ParsedLink::Vmess(c) => vmess(c),
        ParsedLink::Vless(c) => vless(c),
        ParsedLink::Trojan(c) => trojan(c),
        ParsedLink::Shadowsocks(c) => shadowsocks(c),
    };
    serde_json::to_value(config)
}

fn vmess(c: &VmessLink) -> OutboundConfig {
    let settings = json!({
        "vnext": [{
            "address": c.server,
            "port": c.port,
            "users": [{
                "id": c.id,
                "alterId": c.alter_id,
                "security": c.security,
            }],
        }],
    });

    let stream = stream_settings(&StreamParams {
        network: &c.network,
        header_type: &c.header_type,
        host: &c.host,
        path: &c.path,
        tls: c.tls,
        sni: &c.sni,
        server: &c.server,
        ..Default::default()
    });

    OutboundConfig { protocol: "vmess", settings, stream_settings: Some(stream) }
}

fn vless(c: &VlessLink) -> OutboundConfig {
    let mut user = Map::new();
    user.insert("id".into(), json!(c.id));
    user.insert("encryption".into(), json!(c.encryption));
    if !c.flow.is_empty() {
        user.insert("flow".into(), json!(c.flow));
    }

    let settings = json!({
        "vnext": [{
            "address": c.server,
            "port": c.port,
            "users": [Value::Object(user)],
        }],
    });

    // REALITY parameters cannot be recovered from URI form; downgrade to
    // plain rather than emitting a half-configured security block.
    let stream = stream_settings(&StreamParams {
        network: &c.network,
        header_type: &c.header_type,
        host: &c.host,
        path: &c.path,
        mode: &c.mode,
        authority: &c.authority,
        service_name: &c.service_name,
        tls: c.security == "tls",
        sni: &c.sni,
        alpn: &c.alpn,
        server: &c.server,
        ..Default::default()
    });

    OutboundConfig { protocol: "vless", settings, stream_settings: Some(stream) }
}

fn trojan(c: &TrojanLink) -> OutboundConfig {
    let settings = json!({
        "servers": [{
            "address": c.server,
            "port": c.port,
            "password": c.password,
        }],
    });

    let stream = stream_settings(&StreamParams {
        network: &c.network,
        header_type: &c.header_type,
        host: &c.host,
        path: &c.path,
        mode: &c.mode,
        authority: &c.authority,
        service_name: &c.service_name,
        tls: c.security == "tls" || c.security.is_empty(),
        sni: &c.sni,
        alpn: &c.alpn,
        allow_insecure: c.allow_insecure,
        server: &c.server,
    });

    OutboundConfig { protocol: "trojan", settings, stream_settings: Some(stream) }
}

fn shadowsocks(c: &ShadowsocksLink) -> OutboundConfig {
    let settings = json!({
        "servers": [{
            "address": c.server,
            "method": c.method,
            "ota": false,
            "password": c.password,
            "port": c.port,
        }],
    });

    OutboundConfig { protocol: "shadowsocks", settings, stream_settings: None }
}

fn stream_settings(p: &StreamParams<'_>) -> Value {
    let mut stream = Map::new();
    stream.insert("network".into(), json!(p.network));

    match p.network {
        "ws" => {
            let mut ws = Map::new();
            if !p.path.is_empty() {
                ws.insert("path".into(), json!(p.path));
            }
            if !p.host.is_empty() {
                ws.insert("headers".into(), json!({ "Host": p.host }));
            }
            if !ws.is_empty() {
                stream.insert("wsSettings".into(), Value::Object(ws));
            }
        }
        "tcp" => {
            if p.header_type == "http" {
                let mut header = Map::new();
                header.insert("type".into(), json!("http"));
                if !p.host.is_empty() {
                    header.insert(
                        "request".into(),
                        json!({ "headers": { "Host": [p.host] } }),
                    );
                }
                stream.insert("tcpSettings".into(), json!({ "header": header }));
            }
        }
        "kcp" => {
            let header_type = if p.header_type.is_empty() { "none" } else { p.header_type };
            stream.insert(
                "kcpSettings".into(),
                json!({ "header": { "type": header_type } }),
            );
        }
        "http" | "h2" => {
            let mut http = Map::new();
            if !p.path.is_empty() {
                http.insert("path".into(), json!(p.path));
            }
            if !p.host.is_empty() {
                http.insert("host".into(), json!([p.host]));
            }
            stream.insert("httpSettings".into(), Value::Object(http));
        }
        "quic" => {
            let mut quic = Map::new();
            if !p.host.is_empty() {
                quic.insert("security".into(), json!(p.host));
            }
            if !p.path.is_empty() {
                quic.insert("key".into(), json!(p.path));
            }
            let header_type = if p.header_type.is_empty() { "none" } else { p.header_type };
            quic.insert("header".into(), json!({ "type": header_type }));
            stream.insert("quicSettings".into(), Value::Object(quic));
        }
        "grpc" => {
            let mut grpc = Map::new();
            let service = if !p.service_name.is_empty() { p.service_name } else { p.path };
            if !service.is_empty() {
                grpc.insert("serviceName".into(), json!(service));
            }
            if !p.authority.is_empty() {
                grpc.insert("authority".into(), json!(p.authority));
            }
            if !p.mode.is_empty() {
                grpc.insert("multiMode".into(), json!(p.mode == "multi"));
            }
            stream.insert("grpcSettings".into(), Value::Object(grpc));
        }
        _ => {}
    }

    if p.tls {
        stream.insert("security".into(), json!("tls"));
        let mut tls = Map::new();
        let server_name = if !p.sni.is_empty() {
            p.sni
        } else if !p.host.is_empty() {
            p.host
        } else {
            p.server
        };
        if !server_name.is_empty() {
            tls.insert("serverName".into(), json!(server_name));
        }
        if !p.alpn.is_empty() {
            let alpn: Vec<&str> = p.alpn.split(',').map(str::trim).collect();
            tls.insert("alpn".into(), json!(alpn));
        }
        if p.allow_insecure {
            tls.insert("allowInsecure".into(), json!(true));
        }
        if !tls.is_empty() {
            stream.insert("tlsSettings".into(), Value::Object(tls));
        }
    }

    Value::Object(stream)
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    fn render_link(link: &str) -> Value {
        render(&parse(link).unwrap()).unwrap()
    }

    #[test]
    fn shadowsocks_has_no_stream_settings() {
        let v = render_link("ss://YWVzLTI1Ni1nY206cGFzcw@1.2.3.4:8388#n");
        assert_eq!(v["protocol"], "shadowsocks");
        assert_eq!(v["settings"]["servers"][0]["address"], "1.2.3.4");
        assert_eq!(v["settings"]["servers"][0]["method"], "aes-256-gcm");
        assert!(v.get("streamSettings").is_none());
    }

    #[test]
    fn vless_ws_tls() {
        let v = render_link(
            "vless://uuid@h:443?encryption=none&security=tls&type=ws&path=/ws&host=cdn&sni=example.com",
        );
        assert_eq!(v["protocol"], "vless");
        assert_eq!(v["settings"]["vnext"][0]["users"][0]["encryption"], "none");
        let stream = &v["streamSettings"];
        assert_eq!(stream["network"], "ws");
        assert_eq!(stream["wsSettings"]["path"], "/ws");
        assert_eq!(stream["wsSettings"]["headers"]["Host"], "cdn");
        assert_eq!(stream["security"], "tls");
        assert_eq!(stream["tlsSettings"]["serverName"], "example.com");
    }

    #[test]
    fn trojan_defaults_to_tls_with_server_name_fallback() {
        let v = render_link("trojan://pw@proxy.example.com:443");
        let stream = &v["streamSettings"];
        assert_eq!(stream["security"], "tls");
        assert_eq!(stream["tlsSettings"]["serverName"], "proxy.example.com");
        assert!(stream["tlsSettings"].get("allowInsecure").is_none());
    }

    #[test]
    fn trojan_allow_insecure_and_alpn() {
        let v = render_link("trojan://pw@h:443?allowInsecure=1&alpn=h2,%20http/1.1");
        let tls = &v["streamSettings"]["tlsSettings"];
        assert_eq!(tls["allowInsecure"], true);
        assert_eq!(tls["alpn"], json!(["h2", "http/1.1"]));
    }

    #[test]
    fn grpc_prefers_service_name_over_path() {
        let v = render_link("vless://uuid@h:443?type=grpc&serviceName=svc&path=/p&mode=multi");
        let grpc = &v["streamSettings"]["grpcSettings"];
        assert_eq!(grpc["serviceName"], "svc");
        assert_eq!(grpc["multiMode"], true);

        let v = render_link("vless://uuid@h:443?type=grpc&path=/p");
        assert_eq!(v["streamSettings"]["grpcSettings"]["serviceName"], "/p");
    }

    #[test]
    fn tcp_http_header() {
        let v = render_link("vless://uuid@h:443?type=tcp&headerType=http&host=web");
        let tcp = &v["streamSettings"]["tcpSettings"];
        assert_eq!(tcp["header"]["type"], "http");
        assert_eq!(tcp["header"]["request"]["headers"]["Host"], json!(["web"]));
    }

    #[test]
    fn kcp_and_quic_default_header_type() {
        let v = render_link("vless://uuid@h:443?type=kcp");
        assert_eq!(v["streamSettings"]["kcpSettings"]["header"]["type"], "none");

        let v = render_link("vless://uuid@h:443?type=quic&host=aes-128-gcm&path=key");
        let quic = &v["streamSettings"]["quicSettings"];
        assert_eq!(quic["security"], "aes-128-gcm");
        assert_eq!(quic["key"], "key");
        assert_eq!(quic["header"]["type"], "none");
    }

    #[test]
    fn reality_is_downgraded_to_plain() {
        let v = render_link("vless://uuid@h:443?security=reality&sni=x");
        let stream = &v["streamSettings"];
        assert!(stream.get("security").is_none());
        assert!(stream.get("tlsSettings").is_none());
    }

    #[test]
    fn vmess_stream_from_embedded_fields() {
        use super::super::parser::base64::encode_std;
        let body = encode_std(
            br#"{"add":"h","port":443,"id":"uuid","net":"ws","path":"/ws","host":"cdn","tls":"tls","sni":"s"}"#,
        );
        let v = render_link(&format!("vmess://{body}"));
        assert_eq!(v["protocol"], "vmess");
        assert_eq!(v["settings"]["vnext"][0]["users"][0]["alterId"], 0);
        assert_eq!(v["streamSettings"]["wsSettings"]["path"], "/ws");
        assert_eq!(v["streamSettings"]["tlsSettings"]["serverName"], "s");
    }
}
