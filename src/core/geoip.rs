//! Country lookup for remark enrichment.
//!
//! Two implementations behind one capability: a local MaxMind database
//! when one is configured, and a sequential chain of free HTTP geo
//! endpoints otherwise. The chain is tried in order with a short
//! per-attempt timeout; the first non-empty answer wins. Lookups are
//! best-effort throughout — an empty result is normal.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

const HTTP_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves an IP address to an ISO-3166-1 alpha-2 country code.
#[async_trait]
pub trait CountryResolver: Send + Sync {
    async fn country_code(&self, ip: IpAddr) -> Option<String>;
}

/// Builds the resolver for a configuration: MMDB when the path is set and
/// loadable, HTTP fallback chain otherwise.
pub fn resolver_from(mmdb_path: Option<&Path>) -> Arc<dyn CountryResolver> {
    if let Some(path) = mmdb_path {
        match MmdbResolver::open(path) {
            Ok(resolver) => {
                debug!(path = %path.display(), "using local MMDB for country lookup");
                return Arc::new(resolver);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open MMDB, falling back to HTTP lookup");
            }
        }
    }
    Arc::new(HttpChainResolver::new())
}

// ---------------------------------------------------------------------------
// Local MMDB
// ---------------------------------------------------------------------------

pub struct MmdbResolver {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MmdbResolver {
    pub fn open(path: &Path) -> Result<Self, maxminddb::MaxMindDBError> {
        Ok(Self { reader: maxminddb::Reader::open_readfile(path)? })
    }
}

#[async_trait]
impl CountryResolver for MmdbResolver {
    async fn country_code(&self, ip: IpAddr) -> Option<String> {
        let record: maxminddb::geoip2::Country = self.reader.lookup(ip).ok()?;
        record.country.and_then(|c| c.iso_code).map(str::to_string)
    }
}

// ---------------------------------------------------------------------------
// HTTP fallback chain
// ---------------------------------------------------------------------------

pub struct HttpChainResolver {
    client: reqwest::Client,
}

impl Default for HttpChainResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpChainResolver {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_ATTEMPT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn plain_text(&self, url: &str) -> Option<String> {
        let resp = self.client.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body = resp.text().await.ok()?;
        normalize(&body)
    }

    async fn json_field<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Option<T> {
        let resp = self.client.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json().await.ok()
    }
}

#[derive(Deserialize)]
struct IpLocationBody {
    #[serde(default)]
    country_code2: String,
}

#[derive(Deserialize)]
struct FreeIpApiBody {
    #[serde(default, rename = "countryCode")]
    country_code: String,
}

#[async_trait]
impl CountryResolver for HttpChainResolver {
    async fn country_code(&self, ip: IpAddr) -> Option<String> {
        if let Some(code) = self
            .plain_text(&format!("http://api.db-ip.com/v2/free/{ip}/countryCode"))
            .await
        {
            return Some(code);
        }
        if let Some(code) = self
            .plain_text(&format!("https://ipapi.co/{ip}/country_code/"))
            .await
        {
            return Some(code);
        }
        if let Some(body) = self
            .json_field::<IpLocationBody>(&format!("https://api.iplocation.net/?ip={ip}"))
            .await
        {
            if let Some(code) = normalize(&body.country_code2) {
                return Some(code);
            }
        }
        if let Some(body) = self
            .json_field::<FreeIpApiBody>(&format!("https://free.freeipapi.com/api/json/{ip}"))
            .await
        {
            if let Some(code) = normalize(&body.country_code) {
                return Some(code);
            }
        }
        None
    }
}

/// The free endpoints answer error pages and placeholder values with a 200
/// now and then; only a clean two-letter code is accepted.
fn normalize(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 2 && code.bytes().all(|b| b.is_ascii_uppercase()) {
        Some(code)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_clean_codes() {
        assert_eq!(normalize("DE"), Some("DE".to_string()));
        assert_eq!(normalize(" nl\n"), Some("NL".to_string()));
    }

    #[test]
    fn normalize_rejects_junk() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("-"), None);
        assert_eq!(normalize("Unknown"), None);
        assert_eq!(normalize("<html>error</html>"), None);
    }

    #[test]
    fn missing_mmdb_falls_back_to_http() {
        let resolver = resolver_from(Some(Path::new("/nonexistent/geo.mmdb")));
        // Can't probe the concrete type through the trait object, but the
        // construction path must not panic or error.
        let _ = resolver;
    }
}
