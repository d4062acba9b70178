//! Background refresh of the published artifact.
//!
//! On a fixed interval the current artifact is pulled, the dedup markers
//! are flushed so the same links can be re-tested immediately, and a
//! `refresh-` job re-validates every link. The whole flow runs under the
//! exclusive side of the [`ReservationLock`]; scan submissions take the
//! shared side and fail fast while a refresh is in progress.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::ConfigCache;
use crate::core::Scanner;
use crate::jobs::{run_scan, Job, JobRegistry, ScanOutcome, REFRESH_PREFIX};
use crate::publisher::Publisher;
use crate::worker::{Task, WorkerPool};

/// Reservation between scan submissions and the refresher. Scans hold
/// the shared side for the submission path only; the refresher holds the
/// exclusive side for its full flow. `try_scan_hold` never waits — while
/// a refresh holds or is queued for the lock, submissions are rejected
/// with a retryable status upstream.
#[derive(Clone, Default)]
pub struct ReservationLock {
    inner: Arc<RwLock<()>>,
}

impl ReservationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_scan_hold(&self) -> Option<OwnedRwLockReadGuard<()>> {
        Arc::clone(&self.inner).try_read_owned().ok()
    }

    pub async fn refresh_hold(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.inner).write_owned().await
    }
}

/// How long a refresh waits for its job before giving the lock back.
const REFRESH_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct RefreshRunner {
    pub interval: Duration,
    pub lock: ReservationLock,
    pub publisher: Arc<Publisher>,
    pub cache: Arc<dyn ConfigCache>,
    pub pool: Arc<WorkerPool<ScanOutcome>>,
    pub registry: Arc<JobRegistry>,
    pub scanner: Arc<Scanner>,
}

impl RefreshRunner {
    /// Ticks forever. Individual refresh failures are logged and the next
    /// tick retries.
    pub async fn run(self) {
        let mut tick = tokio::time::interval(self.interval.max(Duration::from_secs(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval() fires immediately; the first refresh waits one period.
        tick.tick().await;

        info!(interval_secs = self.interval.as_secs(), "refresh loop started");
        loop {
            tick.tick().await;
            if let Err(e) = self.refresh_once().await {
                warn!(error = %e, "refresh skipped");
            }
        }
    }

    /// One full refresh under the exclusive hold: pull, flush, re-check,
    /// wait for the job to finish.
    pub async fn refresh_once(&self) -> Result<(), String> {
        let _guard = self.lock.refresh_hold().await;
        info!("background refresh started");

        let configs = self
            .publisher
            .get_current_configs()
            .await
            .map_err(|e| format!("artifact fetch failed: {e}"))?;
        if configs.is_empty() {
            info!("remote artifact is empty, nothing to refresh");
            return Ok(());
        }

        self.cache
            .flush_seen()
            .await
            .map_err(|e| format!("dedup flush failed: {e}"))?;

        let job = Arc::new(Job::with_id(
            format!("{REFRESH_PREFIX}{}", Uuid::now_v7()),
            configs,
        ));
        self.registry.insert(Arc::clone(&job));
        job.start();

        let (done_tx, done_rx) = oneshot::channel();
        let scanner = Arc::clone(&self.scanner);
        let scan_job = Arc::clone(&job);
        let task = Task {
            id: job.id.clone(),
            work: Box::pin(async move { Ok(run_scan(scanner, scan_job, None).await) }),
            callback: Some(Box::new(move |_result| {
                let _ = done_tx.send(());
            })),
        };

        if let Err(e) = self.pool.submit(task) {
            job.fail(&e.to_string());
            return Err(format!("refresh submit failed: {e}"));
        }
        info!(job_id = %job.id, total = job.total_count(), "refresh job submitted");

        // Hold the exclusive reservation until the job completes so the
        // refresh input set stays stable.
        match tokio::time::timeout(REFRESH_JOB_TIMEOUT, done_rx).await {
            Ok(Ok(())) => {
                info!(job_id = %job.id, "refresh job finished");
                Ok(())
            }
            Ok(Err(_)) => {
                error!(job_id = %job.id, "refresh job dropped without completing");
                Err("refresh job dropped".to_string())
            }
            Err(_) => Err("refresh job timed out".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_holds_are_shared() {
        let lock = ReservationLock::new();
        let a = lock.try_scan_hold();
        let b = lock.try_scan_hold();
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn refresh_excludes_scans() {
        let lock = ReservationLock::new();
        let guard = lock.refresh_hold().await;
        assert!(lock.try_scan_hold().is_none());
        drop(guard);
        assert!(lock.try_scan_hold().is_some());
    }

    #[tokio::test]
    async fn refresh_waits_for_readers_to_drain() {
        let lock = ReservationLock::new();
        let reader = lock.try_scan_hold().unwrap();

        let lock2 = lock.clone();
        let writer = tokio::spawn(async move {
            let _guard = lock2.refresh_hold().await;
        });

        // Writer cannot finish while the reader is live.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        drop(reader);
        writer.await.unwrap();
    }
}
