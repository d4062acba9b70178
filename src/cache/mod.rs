//! Dedup / result cache.
//!
//! Two concerns share one key-value store: short-TTL `config:<sha256>`
//! markers that reject repeated submissions, and medium-TTL
//! `scan_results:<job-id>` records that hand a finished batch to the
//! publisher. The store is Redis in production; an in-memory twin backs
//! tests and offline runs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::CheckResult;
use crate::jobs::hash_link;

const DEDUP_KEY_PREFIX: &str = "config:";
const RESULT_KEY_PREFIX: &str = "scan_results:";
const SCAN_BATCH: usize = 1000;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A finished batch as stored under `scan_results:<job-id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<CheckResult>,
}

/// The cache capability the handlers, refresher, and publisher consume.
#[async_trait]
pub trait ConfigCache: Send + Sync {
    /// Filters `links` down to those not seen within the dedup TTL and
    /// marks the survivors as seen.
    async fn filter_new(&self, links: &[String]) -> Result<Vec<String>, CacheError>;

    /// Deletes every dedup marker. Returns the number removed.
    async fn flush_seen(&self) -> Result<u64, CacheError>;

    async fn store_results(&self, record: &ScanRecord, ttl: Duration) -> Result<(), CacheError>;

    async fn fetch_results(&self, job_id: &str) -> Result<Option<ScanRecord>, CacheError>;
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

pub struct RedisCache {
    conn: ConnectionManager,
    dedup_ttl: Duration,
}

impl RedisCache {
    /// Connects and pings. A dead cache is a startup failure, not
    /// something to limp along without.
    pub async fn connect(
        addr: &str,
        password: &str,
        db: i64,
        dedup_ttl: Duration,
    ) -> Result<Self, CacheError> {
        let url = if password.is_empty() {
            format!("redis://{addr}/{db}")
        } else {
            format!("redis://:{password}@{addr}/{db}")
        };
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        info!(addr, db, "connected to redis");
        Ok(Self { conn, dedup_ttl })
    }

    fn dedup_key(link: &str) -> String {
        format!("{DEDUP_KEY_PREFIX}{}", hash_link(link))
    }
}

#[async_trait]
impl ConfigCache for RedisCache {
    async fn filter_new(&self, links: &[String]) -> Result<Vec<String>, CacheError> {
        if links.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();

        let mut probe = redis::pipe();
        for link in links {
            probe.exists(Self::dedup_key(link));
        }
        let seen: Vec<bool> = probe.query_async(&mut conn).await?;

        let mut fresh = Vec::with_capacity(links.len());
        let mut mark = redis::pipe();
        for (link, seen) in links.iter().zip(seen) {
            if !seen {
                mark.set_ex(Self::dedup_key(link), 1, self.dedup_ttl.as_secs()).ignore();
                fresh.push(link.clone());
            }
        }
        if !fresh.is_empty() {
            let _: () = mark.query_async(&mut conn).await?;
        }

        debug!(submitted = links.len(), fresh = fresh.len(), "dedup filter applied");
        Ok(fresh)
    }

    async fn flush_seen(&self) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{DEDUP_KEY_PREFIX}*"))
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let mut pipe = redis::pipe();
                for key in &keys {
                    pipe.del(key).ignore();
                }
                let _: () = pipe.query_async(&mut conn).await?;
                deleted += keys.len() as u64;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        info!(deleted, "flushed dedup markers");
        Ok(deleted)
    }

    async fn store_results(&self, record: &ScanRecord, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;
        let _: () = conn
            .set_ex(format!("{RESULT_KEY_PREFIX}{}", record.job_id), payload, ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn fetch_results(&self, job_id: &str) -> Result<Option<ScanRecord>, CacheError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> =
            conn.get(format!("{RESULT_KEY_PREFIX}{job_id}")).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory twin
// ---------------------------------------------------------------------------

/// TTL-less stand-in with the same observable dedup behavior, for tests
/// and offline runs.
#[derive(Default)]
pub struct MemoryCache {
    seen: Mutex<HashSet<String>>,
    records: Mutex<HashMap<String, ScanRecord>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigCache for MemoryCache {
    async fn filter_new(&self, links: &[String]) -> Result<Vec<String>, CacheError> {
        let mut seen = self.seen.lock().expect("seen mutex poisoned");
        let mut fresh = Vec::new();
        for link in links {
            if seen.insert(hash_link(link)) {
                fresh.push(link.clone());
            }
        }
        Ok(fresh)
    }

    async fn flush_seen(&self) -> Result<u64, CacheError> {
        let mut seen = self.seen.lock().expect("seen mutex poisoned");
        let count = seen.len() as u64;
        seen.clear();
        Ok(count)
    }

    async fn store_results(&self, record: &ScanRecord, _ttl: Duration) -> Result<(), CacheError> {
        self.records
            .lock()
            .expect("records mutex poisoned")
            .insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    async fn fetch_results(&self, job_id: &str) -> Result<Option<ScanRecord>, CacheError> {
        Ok(self.records.lock().expect("records mutex poisoned").get(job_id).cloned())
    }
}
