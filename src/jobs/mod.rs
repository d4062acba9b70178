//! In-process job registry.
//!
//! Jobs live for the lifetime of the process. Each job owns a mutex over
//! its mutable state (status, counters, results); the registry is a plain
//! map of id → job. Per-config results are stored for successes only,
//! keyed by the SHA-256 of the final canonical link; failures are logged
//! and counted but not stored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{CheckResult, CheckStatus, Scanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Short per-config record kept in the job's results map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResult {
    pub index: usize,
    pub status: CheckStatus,
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    results: HashMap<String, ConfigResult>,
    done_count: usize,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// One submitted batch. `configs` is immutable after creation; everything
/// else lives behind the state mutex.
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub configs: Vec<String>,
    pub created_at: DateTime<Utc>,
    state: Mutex<JobState>,
}

/// Serialized view of a job, the `GET /job/{id}` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub results: HashMap<String, ConfigResult>,
    pub total_count: usize,
    pub done_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(configs: Vec<String>) -> Self {
        Self::with_id(Uuid::now_v7().to_string(), configs)
    }

    /// Refresh jobs pass an explicit id carrying the `refresh-` prefix.
    pub fn with_id(id: String, configs: Vec<String>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                results: HashMap::with_capacity(configs.len()),
                done_count: 0,
                start_time: None,
                end_time: None,
                error: None,
            }),
            configs,
        }
    }

    pub fn is_refresh(&self) -> bool {
        self.id.starts_with(REFRESH_PREFIX)
    }

    pub fn total_count(&self) -> usize {
        self.configs.len()
    }

    pub fn start(&self) {
        let mut state = self.lock();
        state.status = JobStatus::Running;
        state.start_time = Some(Utc::now());
    }

    pub fn complete(&self) {
        let mut state = self.lock();
        if state.status == JobStatus::Running {
            state.status = JobStatus::Completed;
            state.end_time = Some(Utc::now());
        }
    }

    /// Only fatal submission problems fail a job; individual link
    /// failures never do.
    pub fn fail(&self, error: &str) {
        let mut state = self.lock();
        state.status = JobStatus::Failed;
        state.end_time = Some(Utc::now());
        state.error = Some(error.to_string());
    }

    /// Counts one processed link without storing a result.
    pub fn done(&self) {
        self.lock().done_count += 1;
    }

    /// Stores a success record and counts the link as processed.
    pub fn add_result(&self, config_hash: String, result: ConfigResult) {
        let mut state = self.lock();
        state.results.insert(config_hash, result);
        state.done_count += 1;
    }

    pub fn done_count(&self) -> usize {
        self.lock().done_count
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.lock();
        JobSnapshot {
            id: self.id.clone(),
            status: state.status,
            results: state.results.clone(),
            total_count: self.configs.len(),
            done_count: state.done_count,
            start_time: state.start_time,
            end_time: state.end_time,
            created_at: self.created_at,
            error: state.error.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JobState> {
        self.state.lock().expect("job state mutex poisoned")
    }
}

pub const REFRESH_PREFIX: &str = "refresh-";

/// Process-wide job map. Ids are never reused.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Arc<Job>) {
        self.jobs
            .write()
            .expect("job registry lock poisoned")
            .insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.read().expect("job registry lock poisoned").get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().expect("job registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical hash domain for dedup and result keys: the link without its
/// fragment, trimmed.
pub fn hash_link(link: &str) -> String {
    let canonical = link.trim();
    let canonical = match canonical.find('#') {
        Some(pos) => &canonical[..pos],
        None => canonical,
    };
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// What a finished scan task hands to the pool's result handler.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub job_id: String,
    pub results: Vec<CheckResult>,
}

/// Hook fired for each successful result (notification sidecar).
pub type SuccessHook = Arc<dyn Fn(&CheckResult) + Send + Sync>;

/// The scan task body shared by user scans and background refreshes:
/// stream results from the scanner into the job, fire the success hook,
/// and emit the full batch for the publisher when the stream ends.
pub async fn run_scan(
    scanner: Arc<Scanner>,
    job: Arc<Job>,
    on_success: Option<SuccessHook>,
) -> ScanOutcome {
    let mut results = Vec::with_capacity(job.configs.len());
    let mut rx = scanner.check_links(job.configs.clone());
    let mut index = 0usize;

    while let Some(result) = rx.recv().await {
        match result.status {
            CheckStatus::Success => {
                info!(
                    job_id = %job.id,
                    server = %result.server,
                    delay_ms = result.delay_ms,
                    "link check succeeded"
                );
                job.add_result(
                    hash_link(&result.raw),
                    ConfigResult {
                        index,
                        status: result.status,
                        delay_ms: result.delay_ms,
                        error: None,
                    },
                );
                if let Some(hook) = &on_success {
                    hook(&result);
                }
            }
            CheckStatus::Unavailable | CheckStatus::Error => {
                warn!(
                    job_id = %job.id,
                    server = %result.server,
                    protocol = ?result.protocol,
                    error = %result.error,
                    "link check failed"
                );
                job.done();
            }
        }

        if job.done_count() >= job.total_count() {
            job.complete();
            info!(job_id = %job.id, "job completed");
        }

        results.push(result);
        index += 1;
    }

    ScanOutcome { job_id: job.id.clone(), results }
}
