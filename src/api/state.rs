use std::sync::Arc;

use crate::cache::ConfigCache;
use crate::config::Config;
use crate::core::Scanner;
use crate::jobs::{JobRegistry, ScanOutcome, SuccessHook};
use crate::refresh::ReservationLock;
use crate::worker::WorkerPool;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scanner: Arc<Scanner>,
    pub registry: Arc<JobRegistry>,
    pub cache: Arc<dyn ConfigCache>,
    pub pool: Arc<WorkerPool<ScanOutcome>>,
    pub lock: ReservationLock,
    /// Fired once per successful result (notification sidecar).
    pub on_success: Option<SuccessHook>,
}
