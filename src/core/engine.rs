//! Proxy engine integration.
//!
//! The checker needs exactly two capabilities from an engine: build a
//! running instance from a JSON outbound description, and dial a TCP
//! destination through it. [`XrayEngine`] provides both by spawning a
//! short-lived xray process with a local SOCKS inbound; [`DirectEngine`]
//! skips the tunnel entirely and dials the destination itself, which is
//! useful for plain reachability sweeps and tests.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tracing::debug;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("outbound rejected: {0}")]
    Build(String),
    #[error("engine start failed: {0}")]
    Start(String),
    #[error("dial failed: {0}")]
    Dial(String),
}

/// One running proxy instance, ready to tunnel TCP streams.
#[async_trait]
pub trait ProxyTunnel: Send {
    /// Opens a TCP stream to `host:port` through the instance.
    async fn dial(&mut self, host: &str, port: u16) -> Result<TcpStream, EngineError>;

    /// Tears the instance down. Must be safe to call more than once.
    async fn close(&mut self);
}

/// Builds running instances from outbound descriptions.
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    async fn launch(&self, outbound: &Value) -> Result<Box<dyn ProxyTunnel>, EngineError>;
}

// ---------------------------------------------------------------------------
// Xray process engine
// ---------------------------------------------------------------------------

const READINESS_ATTEMPTS: u32 = 40;
const READINESS_INTERVAL: Duration = Duration::from_millis(50);

/// Spawns one xray process per check, configured with a loopback SOCKS
/// inbound on an ephemeral port and the single outbound under test.
pub struct XrayEngine {
    bin: String,
}

impl XrayEngine {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Full instance configuration wrapped around one outbound: quiet
    /// logs, sniffing SOCKS inbound, public DNS, IP-if-nonmatch routing.
    fn instance_config(outbound: &Value, socks_port: u16) -> Value {
        json!({
            "log": { "loglevel": "none", "access": "none", "error": "none" },
            "inbounds": [{
                "tag": "inbound-probe",
                "listen": "127.0.0.1",
                "port": socks_port,
                "protocol": "socks",
                "settings": { "auth": "noauth", "udp": true, "timeout": 5 },
                "sniffing": { "enabled": true, "destOverride": ["http", "tls"] },
            }],
            "outbounds": [outbound],
            "routing": { "rules": [], "domainStrategy": "IPIfNonMatch" },
            "dns": { "servers": ["8.8.8.8", "8.8.4.4", "1.1.1.1"] },
        })
    }
}

#[async_trait]
impl ProxyEngine for XrayEngine {
    async fn launch(&self, outbound: &Value) -> Result<Box<dyn ProxyTunnel>, EngineError> {
        // Reserve an ephemeral loopback port for the SOCKS inbound. The
        // listener is dropped before xray binds; the window is tiny and a
        // collision surfaces as a start failure on the next line.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| EngineError::Start(e.to_string()))?;
        let socks_port = listener
            .local_addr()
            .map_err(|e| EngineError::Start(e.to_string()))?
            .port();
        drop(listener);

        let config = Self::instance_config(outbound, socks_port);
        let config_file = tempfile::NamedTempFile::new()
            .map_err(|e| EngineError::Start(e.to_string()))?;
        serde_json::to_writer(config_file.as_file(), &config)
            .map_err(|e| EngineError::Build(e.to_string()))?;

        let child = Command::new(&self.bin)
            .arg("run")
            .arg("-c")
            .arg(config_file.path())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Start(format!("spawn {}: {}", self.bin, e)))?;

        let mut tunnel = XrayTunnel { child, socks_port, _config: config_file };
        tunnel.wait_ready().await?;
        debug!(port = socks_port, "xray instance ready");
        Ok(Box::new(tunnel))
    }
}

struct XrayTunnel {
    child: Child,
    socks_port: u16,
    // Keeps the config file alive for the process lifetime.
    _config: tempfile::NamedTempFile,
}

impl XrayTunnel {
    async fn wait_ready(&mut self) -> Result<(), EngineError> {
        for _ in 0..READINESS_ATTEMPTS {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(EngineError::Start(format!("engine exited early: {status}")));
            }
            if TcpStream::connect((Ipv4Addr::LOCALHOST, self.socks_port)).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(READINESS_INTERVAL).await;
        }
        Err(EngineError::Start("SOCKS inbound never came up".to_string()))
    }
}

#[async_trait]
impl ProxyTunnel for XrayTunnel {
    async fn dial(&mut self, host: &str, port: u16) -> Result<TcpStream, EngineError> {
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, self.socks_port))
            .await
            .map_err(|e| EngineError::Dial(e.to_string()))?;
        socks5_connect(stream, host, port).await
    }

    async fn close(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// SOCKS5 noauth handshake followed by a CONNECT request. Returns the
/// stream positioned after the reply, ready for payload bytes.
async fn socks5_connect(
    mut stream: TcpStream,
    host: &str,
    port: u16,
) -> Result<TcpStream, EngineError> {
    let io = |e: std::io::Error| EngineError::Dial(e.to_string());

    // Method negotiation: VER=5, one method, NOAUTH.
    stream.write_all(&[0x05, 0x01, 0x00]).await.map_err(io)?;
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.map_err(io)?;
    if reply[0] != 0x05 {
        return Err(EngineError::Dial("socks5: bad version".to_string()));
    }
    if reply[1] != 0x00 {
        return Err(EngineError::Dial("socks5: no acceptable auth method".to_string()));
    }

    // CONNECT. IPv4 literals go as ATYP=1, everything else as a domain.
    let mut msg = Vec::with_capacity(22);
    msg.extend_from_slice(&[0x05, 0x01, 0x00]);
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => {
            msg.push(0x01);
            msg.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(EngineError::Dial("socks5: hostname too long".to_string()));
            }
            msg.push(0x03);
            msg.push(host.len() as u8);
            msg.extend_from_slice(host.as_bytes());
        }
    }
    msg.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&msg).await.map_err(io)?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.map_err(io)?;
    if head[1] != 0x00 {
        return Err(EngineError::Dial(format!("socks5: connect failed, rep={:#04x}", head[1])));
    }

    // Consume BND.ADDR + BND.PORT.
    match head[3] {
        0x01 => {
            let mut rest = [0u8; 4 + 2];
            stream.read_exact(&mut rest).await.map_err(io)?;
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(io)?;
            let mut rest = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut rest).await.map_err(io)?;
        }
        0x04 => {
            let mut rest = [0u8; 16 + 2];
            stream.read_exact(&mut rest).await.map_err(io)?;
        }
        _ => return Err(EngineError::Dial("socks5: bad address type".to_string())),
    }

    Ok(stream)
}

// ---------------------------------------------------------------------------
// Direct engine
// ---------------------------------------------------------------------------

/// Dials destinations without any tunnel. Measures plain TCP reachability
/// of the probe target; the outbound description is ignored.
pub struct DirectEngine;

#[async_trait]
impl ProxyEngine for DirectEngine {
    async fn launch(&self, _outbound: &Value) -> Result<Box<dyn ProxyTunnel>, EngineError> {
        Ok(Box::new(DirectTunnel))
    }
}

struct DirectTunnel;

#[async_trait]
impl ProxyTunnel for DirectTunnel {
    async fn dial(&mut self, host: &str, port: u16) -> Result<TcpStream, EngineError> {
        TcpStream::connect((host, port))
            .await
            .map_err(|e| EngineError::Dial(e.to_string()))
    }

    async fn close(&mut self) {}
}
