//! Proxy checking.
//!
//! One check = launch an engine instance for the outbound, dial the
//! reachability target through it, write a short probe, wait for any
//! response byte. Elapsed time runs from the start of the dial to the
//! first byte back. The dial+write+read phase shares a single hard
//! timeout; the instance is torn down whatever happens.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;

use super::engine::{EngineError, ProxyEngine};
use super::outbound;
use super::parser::ParsedLink;

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CHECK_HOST: &str = "1.1.1.1";
pub const DEFAULT_CHECK_PORT: u16 = 80;

const PROBE: &[u8] = b"ping";
const READ_BUFFER: usize = 1024;

/// A failed check, tagged with the stage that failed.
#[derive(Debug, Clone, Error)]
pub enum CheckError {
    #[error("outbound build failed: {0}")]
    Build(String),
    #[error("engine start failed: {0}")]
    Start(String),
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("probe write failed: {0}")]
    Write(String),
    #[error("probe read failed: {0}")]
    Read(String),
    #[error("check timed out after {0:?}")]
    Timeout(Duration),
}

impl From<EngineError> for CheckError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Build(msg) => CheckError::Build(msg),
            EngineError::Start(msg) => CheckError::Start(msg),
            EngineError::Dial(msg) => CheckError::Dial(msg),
        }
    }
}

/// Checks parsed configurations through a proxy engine. Stateless; the
/// driver above gates how many checks run at once.
pub struct Checker {
    engine: Arc<dyn ProxyEngine>,
    timeout: Duration,
    host: String,
    port: u16,
}

impl Checker {
    pub fn new(engine: Arc<dyn ProxyEngine>, timeout: Duration, host: String, port: u16) -> Self {
        Self { engine, timeout, host, port }
    }

    /// Tunnels a probe through `parsed` and returns the time to first
    /// response byte.
    pub async fn check(&self, parsed: &ParsedLink) -> Result<Duration, CheckError> {
        let outbound =
            outbound::render(parsed).map_err(|e| CheckError::Build(e.to_string()))?;

        let mut tunnel = self.engine.launch(&outbound).await.map_err(CheckError::from)?;

        let started = Instant::now();
        let probe = tokio::time::timeout(self.timeout, async {
            let mut stream = tunnel
                .dial(&self.host, self.port)
                .await
                .map_err(CheckError::from)?;
            stream
                .write_all(PROBE)
                .await
                .map_err(|e| CheckError::Write(e.to_string()))?;

            let mut buf = [0u8; READ_BUFFER];
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| CheckError::Read(e.to_string()))?;
            if n == 0 {
                return Err(CheckError::Read("connection closed before any response".to_string()));
            }
            trace!(bytes = n, "probe response received");
            Ok(())
        })
        .await;

        tunnel.close().await;

        match probe {
            Err(_) => Err(CheckError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => Ok(started.elapsed()),
        }
    }
}
