//! Artifact publishing.
//!
//! On job completion the stored batch is projected to artifact entries
//! (successes only), merged with — or, for refreshes, substituted for —
//! the current remote artifact, sorted by delay, encrypted, and pushed to
//! the Git remote as a single base64 file. Reads go through raw HTTP
//! first and fall back to a shallow clone.
//!
//! libgit2 calls are blocking; every Git step runs under
//! `spawn_blocking`.

pub mod crypto;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use git2::build::RepoBuilder;
use git2::{Cred, FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CacheError, ConfigCache, ScanRecord};
use crate::core::CheckStatus;
use crypto::CryptoError;

pub const ARTIFACT_FILE: &str = "results.txt";
const BOT_NAME: &str = "Namira Bot";
const BOT_EMAIL: &str = "namiranet@proton.me";
const REMOTE_NAME: &str = "origin";
const CLONE_DEPTH: i32 = 1;
const HTTP_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("no stored results for job {0}")]
    MissingResults(String),
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("artifact is not valid base64")]
    BadEncoding,
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ssh key not found: {0}")]
    MissingKey(PathBuf),
    #[error("encryption key must be 32 bytes")]
    BadKey,
    #[error("publisher task panicked")]
    TaskPanicked,
}

/// One working configuration in the remote artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub delay_ms: u64,
    pub status: CheckStatus,
    pub protocol: String,
    pub raw_config: String,
    pub country_code: String,
    pub remark: String,
    pub server: String,
}

/// The decrypted artifact body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<ArtifactEntry>,
}

/// Projects a stored batch to artifact entries, keeping successes only.
pub fn project_record(record: &ScanRecord) -> Artifact {
    let results = record
        .results
        .iter()
        .filter(|r| r.status == CheckStatus::Success)
        .map(|r| ArtifactEntry {
            delay_ms: r.delay_ms,
            status: r.status,
            protocol: r.protocol.map(|p| p.to_string()).unwrap_or_default(),
            raw_config: r.raw.clone(),
            country_code: r.country_code.clone(),
            remark: r.remark.clone(),
            server: r.server.clone(),
        })
        .collect();

    Artifact { job_id: record.job_id.clone(), timestamp: record.timestamp, results }
}

/// Appends entries from `existing` whose raw_config hash is absent from
/// `current`. Entry identity is sha256 of the raw config text.
pub fn merge_existing(current: &mut Artifact, existing: Artifact) {
    let known: HashSet<String> =
        current.results.iter().map(|e| hash_entry(&e.raw_config)).collect();
    for entry in existing.results {
        if !known.contains(&hash_entry(&entry.raw_config)) {
            current.results.push(entry);
        }
    }
}

fn hash_entry(raw_config: &str) -> String {
    hex::encode(Sha256::digest(raw_config.as_bytes()))
}

/// Encodes an artifact to its on-disk form: base64(encrypt(json)).
pub fn seal_artifact(artifact: &Artifact, key: &[u8]) -> Result<String, PublishError> {
    let json = serde_json::to_vec(artifact)?;
    let sealed = crypto::encrypt(&json, key)?;
    Ok(BASE64.encode(sealed))
}

/// Decodes the on-disk form back into an artifact.
pub fn open_artifact(content: &[u8], key: &[u8]) -> Result<Artifact, PublishError> {
    let text = std::str::from_utf8(content).map_err(|_| PublishError::BadEncoding)?;
    let sealed = BASE64
        .decode(text.trim())
        .map_err(|_| PublishError::BadEncoding)?;
    let json = crypto::decrypt(&sealed, key)?;
    Ok(serde_json::from_slice(&json)?)
}

pub struct Publisher {
    cache: Arc<dyn ConfigCache>,
    http: reqwest::Client,
    owner: String,
    repo: String,
    repo_url: String,
    ssh_key: PathBuf,
    key: Vec<u8>,
    work_dir: PathBuf,
}

impl Publisher {
    pub fn new(
        cache: Arc<dyn ConfigCache>,
        owner: &str,
        repo: &str,
        ssh_key: &Path,
        key: Vec<u8>,
    ) -> Result<Self, PublishError> {
        if !ssh_key.exists() {
            return Err(PublishError::MissingKey(ssh_key.to_path_buf()));
        }
        if key.len() != crypto::KEY_LEN {
            return Err(PublishError::BadKey);
        }

        let http = reqwest::Client::builder()
            .timeout(HTTP_FETCH_TIMEOUT)
            .user_agent(concat!("proxybox/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            cache,
            http,
            owner: owner.to_string(),
            repo: repo.to_string(),
            repo_url: format!("git@github.com:{owner}/{repo}.git"),
            ssh_key: ssh_key.to_path_buf(),
            key,
            work_dir: std::env::temp_dir().join(format!("proxybox-publisher-{owner}-{repo}")),
        })
    }

    /// Verifies credentials and connectivity with a throwaway clone.
    pub async fn health_check(&self) -> Result<(), PublishError> {
        let url = self.repo_url.clone();
        let ssh_key = self.ssh_key.clone();
        let dir = self.work_dir.with_extension("healthcheck");
        run_blocking(move || {
            let _ = std::fs::remove_dir_all(&dir);
            let result = clone_repo(&url, &dir, &ssh_key).map(|_| ());
            let _ = std::fs::remove_dir_all(&dir);
            result
        })
        .await
    }

    /// Scan path: merge with the existing artifact.
    pub async fn process_scan_results(&self, job_id: &str) -> Result<(), PublishError> {
        self.publish(job_id, true).await
    }

    /// Refresh path: the new set replaces the artifact outright.
    pub async fn process_refresh_results(&self, job_id: &str) -> Result<(), PublishError> {
        self.publish(job_id, false).await
    }

    async fn publish(&self, job_id: &str, merge: bool) -> Result<(), PublishError> {
        let record = self
            .cache
            .fetch_results(job_id)
            .await?
            .ok_or_else(|| PublishError::MissingResults(job_id.to_string()))?;
        let mut artifact = project_record(&record);

        let url = self.repo_url.clone();
        let ssh_key = self.ssh_key.clone();
        let key = self.key.clone();
        let dir = self.work_dir.clone();
        let job_id = job_id.to_string();

        run_blocking(move || {
            let _ = std::fs::remove_dir_all(&dir);
            let result = (|| -> Result<(), PublishError> {
                let repo = clone_repo(&url, &dir, &ssh_key)?;
                let file_path = dir.join(ARTIFACT_FILE);

                if merge {
                    match std::fs::read(&file_path) {
                        Ok(content) => match open_artifact(&content, &key) {
                            Ok(existing) => merge_existing(&mut artifact, existing),
                            Err(e) => {
                                warn!(error = %e, "existing artifact unreadable, publishing fresh set")
                            }
                        },
                        Err(_) => { /* first publish, nothing to merge */ }
                    }
                }

                artifact.results.sort_by_key(|entry| entry.delay_ms);
                std::fs::write(&file_path, seal_artifact(&artifact, &key)?)?;
                commit_and_push(&repo, &ssh_key, &job_id)
            })();
            let _ = std::fs::remove_dir_all(&dir);
            result
        })
        .await?;

        info!(job_id = %record.job_id, repo = %format!("{}/{}", self.owner, self.repo),
              merge, "artifact published");
        Ok(())
    }

    /// The raw configs currently in the remote artifact. Raw HTTP first,
    /// Git clone as fallback; a missing artifact is an empty set.
    pub async fn get_current_configs(&self) -> Result<Vec<String>, PublishError> {
        match self.fetch_via_http().await {
            Ok(configs) => Ok(configs),
            Err(e) => {
                warn!(error = %e, "raw fetch failed, falling back to git clone");
                self.fetch_via_git().await
            }
        }
    }

    async fn fetch_via_http(&self) -> Result<Vec<String>, PublishError> {
        let url = format!(
            "https://raw.githubusercontent.com/{}/{}/main/{ARTIFACT_FILE}",
            self.owner, self.repo
        );
        let resp = self.http.get(&url).send().await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            info!("no remote artifact yet, starting fresh");
            return Ok(Vec::new());
        }
        let resp = resp.error_for_status()?;
        let content = resp.bytes().await?;

        let artifact = open_artifact(&content, &self.key)?;
        Ok(artifact.results.into_iter().map(|e| e.raw_config).collect())
    }

    async fn fetch_via_git(&self) -> Result<Vec<String>, PublishError> {
        let url = self.repo_url.clone();
        let ssh_key = self.ssh_key.clone();
        let key = self.key.clone();
        let dir = self.work_dir.with_extension("fetch");

        run_blocking(move || {
            let _ = std::fs::remove_dir_all(&dir);
            let result = (|| -> Result<Vec<String>, PublishError> {
                clone_repo(&url, &dir, &ssh_key)?;
                let content = match std::fs::read(dir.join(ARTIFACT_FILE)) {
                    Ok(content) => content,
                    Err(_) => return Ok(Vec::new()),
                };
                let artifact = open_artifact(&content, &key)?;
                Ok(artifact.results.into_iter().map(|e| e.raw_config).collect())
            })();
            let _ = std::fs::remove_dir_all(&dir);
            result
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, PublishError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PublishError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| PublishError::TaskPanicked)?
}

fn auth_callbacks(ssh_key: &Path) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username, _allowed| {
        Cred::ssh_key(username.unwrap_or("git"), None, ssh_key, None)
    });
    callbacks
}

fn clone_repo(url: &str, dir: &Path, ssh_key: &Path) -> Result<Repository, PublishError> {
    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(auth_callbacks(ssh_key));
    fetch.depth(CLONE_DEPTH);
    Ok(RepoBuilder::new().fetch_options(fetch).clone(url, dir)?)
}

fn commit_and_push(
    repo: &Repository,
    ssh_key: &Path,
    job_id: &str,
) -> Result<(), PublishError> {
    let mut index = repo.index()?;
    index.add_path(Path::new(ARTIFACT_FILE))?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let signature = Signature::now(BOT_NAME, BOT_EMAIL)?;
    let message = format!("🤖 Update scan results - Job {job_id}");

    // A brand-new remote has no HEAD commit yet.
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)?;

    let refspec = repo
        .head()
        .ok()
        .and_then(|head| head.name().map(str::to_string))
        .unwrap_or_else(|| "refs/heads/main".to_string());

    let mut push = PushOptions::new();
    push.remote_callbacks(auth_callbacks(ssh_key));
    let mut remote = repo.find_remote(REMOTE_NAME)?;
    remote.push(&[format!("{refspec}:{refspec}")], Some(&mut push))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::Protocol;
    use crate::core::CheckResult;

    const KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

    fn entry(raw: &str, delay: u64) -> ArtifactEntry {
        ArtifactEntry {
            delay_ms: delay,
            status: CheckStatus::Success,
            protocol: "ss".to_string(),
            raw_config: raw.to_string(),
            country_code: "DE".to_string(),
            remark: "remark".to_string(),
            server: "h".to_string(),
        }
    }

    fn artifact(entries: Vec<ArtifactEntry>) -> Artifact {
        Artifact { job_id: "job".to_string(), timestamp: Utc::now(), results: entries }
    }

    #[test]
    fn projection_keeps_successes_only() {
        let record = ScanRecord {
            job_id: "job-1".to_string(),
            timestamp: Utc::now(),
            results: vec![
                CheckResult {
                    status: CheckStatus::Success,
                    protocol: Some(Protocol::Shadowsocks),
                    raw: "ss://ok".to_string(),
                    delay_ms: 12,
                    ..Default::default()
                },
                CheckResult {
                    status: CheckStatus::Error,
                    raw: "ss://bad".to_string(),
                    error: "dial failed".to_string(),
                    ..Default::default()
                },
            ],
        };

        let artifact = project_record(&record);
        assert_eq!(artifact.results.len(), 1);
        assert_eq!(artifact.results[0].raw_config, "ss://ok");
        assert_eq!(artifact.results[0].protocol, "ss");
    }

    #[test]
    fn merge_appends_only_unknown_entries() {
        let mut current = artifact(vec![entry("ss://b", 20)]);
        let existing = artifact(vec![entry("ss://a", 10), entry("ss://b", 99)]);

        merge_existing(&mut current, existing);

        assert_eq!(current.results.len(), 2);
        // The new run's version of ss://b wins.
        let b = current.results.iter().find(|e| e.raw_config == "ss://b").unwrap();
        assert_eq!(b.delay_ms, 20);
    }

    #[test]
    fn merged_artifact_is_unique_by_hash() {
        let mut current = artifact(vec![entry("ss://a", 1), entry("ss://b", 2)]);
        let existing = artifact(vec![entry("ss://a", 3), entry("ss://c", 4)]);
        merge_existing(&mut current, existing);

        let hashes: HashSet<String> =
            current.results.iter().map(|e| hash_entry(&e.raw_config)).collect();
        assert_eq!(hashes.len(), current.results.len());
    }

    #[test]
    fn seal_open_roundtrip() {
        let original = artifact(vec![entry("ss://a", 10), entry("ss://b", 20)]);
        let sealed = seal_artifact(&original, KEY).unwrap();

        // The on-disk form is pure base64 text.
        assert!(BASE64.decode(&sealed).is_ok());

        let reopened = open_artifact(sealed.as_bytes(), KEY).unwrap();
        assert_eq!(reopened.job_id, original.job_id);
        assert_eq!(reopened.results.len(), 2);
        assert_eq!(reopened.results[0].raw_config, "ss://a");
    }

    #[test]
    fn open_rejects_wrong_key_and_garbage() {
        let sealed = seal_artifact(&artifact(vec![]), KEY).unwrap();
        let other = b"fedcba9876543210fedcba9876543210";
        assert!(matches!(
            open_artifact(sealed.as_bytes(), other),
            Err(PublishError::Crypto(_))
        ));
        assert!(matches!(
            open_artifact(b"%%% not base64 %%%", KEY),
            Err(PublishError::BadEncoding)
        ));
    }

    #[test]
    fn artifact_entry_wire_format() {
        let value = serde_json::to_value(entry("ss://a", 7)).unwrap();
        assert_eq!(value["delay_ms"], 7);
        assert_eq!(value["status"], "success");
        assert_eq!(value["raw_config"], "ss://a");
        assert_eq!(value["country_code"], "DE");
        assert!(value.get("server").is_some());
    }
}
