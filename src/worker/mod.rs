//! Bounded worker pool.
//!
//! A fixed number of workers consume one bounded task queue. Submission is
//! non-blocking and fails fast when the queue is saturated — backpressure
//! is the caller's problem, not a hidden await. Completions flow to a
//! single result-handler task that owns the counters; per-task callbacks
//! are fired from their own spawned task so a slow callback never blocks
//! the handler.
//!
//! `stop` closes the queue, drains the workers, and lets the completion
//! channel close behind them. It is idempotent.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_WORKER_COUNT: usize = 5;
pub const DEFAULT_QUEUE_SIZE: usize = 100;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is not started")]
    NotStarted,
    #[error("worker pool is already started")]
    AlreadyStarted,
    #[error("task queue is full")]
    QueueFull,
    #[error("worker pool is shutting down")]
    ShuttingDown,
    #[error("timeout waiting for task completion")]
    WaitTimeout,
}

/// Why a task produced no value.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("task canceled by pool shutdown")]
    Canceled,
    #[error("{0}")]
    Failed(String),
}

pub type TaskFuture<T> = Pin<Box<dyn Future<Output = Result<T, TaskError>> + Send>>;
pub type TaskCallback<T> = Box<dyn FnOnce(Result<T, TaskError>) + Send>;

/// One unit of work: an id, a future producing the result, and an
/// optional callback fired with a copy of the outcome.
pub struct Task<T> {
    pub id: String,
    pub work: TaskFuture<T>,
    pub callback: Option<TaskCallback<T>>,
}

/// A finished task as seen by the result handler.
pub struct TaskCompletion<T> {
    pub task_id: String,
    pub result: Result<T, TaskError>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    total: u64,
    completed: u64,
    failed: u64,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub worker_count: usize,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub queue_length: u64,
    pub is_running: bool,
    pub uptime: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub queue_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { worker_count: DEFAULT_WORKER_COUNT, queue_size: DEFAULT_QUEUE_SIZE }
    }
}

pub struct WorkerPool<T> {
    config: PoolConfig,
    task_tx: Mutex<Option<mpsc::Sender<Task<T>>>>,
    task_rx: Mutex<Option<mpsc::Receiver<Task<T>>>>,
    result_tx: Mutex<Option<mpsc::Sender<TaskCompletion<T>>>>,
    result_rx: Mutex<Option<mpsc::Receiver<TaskCompletion<T>>>>,
    shutdown: watch::Sender<bool>,
    counters: Arc<Mutex<Counters>>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    started_at: Instant,
}

impl<T: Clone + Send + 'static> WorkerPool<T> {
    pub fn new(config: PoolConfig) -> Self {
        let config = PoolConfig {
            worker_count: config.worker_count.max(1),
            queue_size: config.queue_size.max(1),
        };
        let (task_tx, task_rx) = mpsc::channel(config.queue_size);
        let (result_tx, result_rx) = mpsc::channel(config.queue_size);
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            task_tx: Mutex::new(Some(task_tx)),
            task_rx: Mutex::new(Some(task_rx)),
            result_tx: Mutex::new(Some(result_tx)),
            result_rx: Mutex::new(Some(result_rx)),
            shutdown,
            counters: Arc::new(Mutex::new(Counters::default())),
            workers: AsyncMutex::new(Vec::new()),
            started: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Spawns the workers. Fails if called twice.
    pub async fn start(&self) -> Result<(), PoolError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyStarted);
        }

        let task_rx = self
            .task_rx
            .lock()
            .expect("task_rx mutex poisoned")
            .take()
            .ok_or(PoolError::AlreadyStarted)?;
        let shared_rx = Arc::new(AsyncMutex::new(task_rx));

        // Workers get clones of the completion sender; the pool drops its
        // own so the channel closes exactly when the last worker exits.
        let result_tx = self
            .result_tx
            .lock()
            .expect("result_tx mutex poisoned")
            .take()
            .ok_or(PoolError::AlreadyStarted)?;

        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.config.worker_count {
            let rx = Arc::clone(&shared_rx);
            let tx = result_tx.clone();
            let shutdown = self.shutdown.subscribe();
            workers.push(tokio::spawn(worker_loop(worker_id, rx, tx, shutdown)));
            debug!(worker_id, "worker spawned");
        }

        Ok(())
    }

    /// Non-blocking submit. `QueueFull` when the backlog is saturated.
    pub fn submit(&self, task: Task<T>) -> Result<(), PoolError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(PoolError::NotStarted);
        }
        let guard = self.task_tx.lock().expect("task_tx mutex poisoned");
        let tx = guard.as_ref().ok_or(PoolError::ShuttingDown)?;

        match tx.try_send(task) {
            Ok(()) => {
                self.counters.lock().expect("counters mutex poisoned").total += 1;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(PoolError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolError::ShuttingDown),
        }
    }

    /// Submits every task or stops at the first failure.
    pub fn submit_batch(&self, tasks: Vec<Task<T>>) -> Result<(), PoolError> {
        for task in tasks {
            self.submit(task)?;
        }
        Ok(())
    }

    /// Installs the single result handler. The handler task owns the
    /// completion receiver and the completed/failed counters.
    pub fn set_result_handler<F>(&self, handler: F)
    where
        F: Fn(TaskCompletion<T>) + Send + 'static,
    {
        let Some(mut rx) = self.result_rx.lock().expect("result_rx mutex poisoned").take()
        else {
            warn!("result handler installed twice, ignoring");
            return;
        };
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            while let Some(completion) = rx.recv().await {
                {
                    let mut c = counters.lock().expect("counters mutex poisoned");
                    if completion.result.is_err() {
                        c.failed += 1;
                    } else {
                        c.completed += 1;
                    }
                }
                handler(completion);
            }
            debug!("result handler drained");
        });
    }

    pub fn stats(&self) -> PoolStats {
        let c = self.counters.lock().expect("counters mutex poisoned").clone();
        let queue_length = self
            .task_tx
            .lock()
            .expect("task_tx mutex poisoned")
            .as_ref()
            .map(|tx| (self.config.queue_size - tx.capacity()) as u64)
            .unwrap_or(0);

        PoolStats {
            worker_count: self.config.worker_count,
            total_tasks: c.total,
            completed_tasks: c.completed,
            failed_tasks: c.failed,
            queue_length,
            is_running: self.started.load(Ordering::SeqCst),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Blocks until the queue is empty and every submitted task has been
    /// accounted, or the timeout elapses.
    pub async fn wait_for_completion(&self, timeout: Duration) -> Result<(), PoolError> {
        let deadline = Instant::now() + timeout;
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        loop {
            tick.tick().await;
            let stats = self.stats();
            if stats.queue_length == 0
                && stats.completed_tasks + stats.failed_tasks == stats.total_tasks
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PoolError::WaitTimeout);
            }
        }
    }

    /// Closes the queue and drains the workers. Safe to call repeatedly.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        self.task_tx.lock().expect("task_tx mutex poisoned").take();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
        debug!("worker pool stopped");
    }
}

async fn worker_loop<T: Clone + Send + 'static>(
    worker_id: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<Task<T>>>>,
    result_tx: mpsc::Sender<TaskCompletion<T>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                task = rx.recv() => task,
                _ = shutdown.changed() => None,
            }
        };
        let Some(task) = task else {
            debug!(worker_id, "worker exiting");
            return;
        };

        let started = Instant::now();
        let result = tokio::select! {
            result = task.work => result,
            _ = shutdown.changed() => Err(TaskError::Canceled),
        };
        let completion = TaskCompletion {
            task_id: task.id,
            result: result.clone(),
            duration: started.elapsed(),
        };

        if result_tx.send(completion).await.is_err() {
            warn!(worker_id, "completion channel closed, dropping result");
        }
        if let Some(callback) = task.callback {
            tokio::spawn(async move { callback(result) });
        }
    }
}
