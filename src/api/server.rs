//! Server composition root.
//!
//! Wires the cache, publisher, scanner, worker pool, registry, refresh
//! loop, and HTTP surface together from one [`Config`], then serves with
//! graceful shutdown. Startup is fail-fast: an unreachable cache, a
//! missing SSH key, or a bad encryption key all abort before the
//! listener binds.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{error, info, warn};

use super::error::ApiError;
use super::services;
use super::state::AppState;
use crate::cache::{ConfigCache, RedisCache, ScanRecord};
use crate::config::Config;
use crate::core::engine::XrayEngine;
use crate::core::filler::RemarkTemplate;
use crate::core::{geoip, Scanner, ScannerOptions};
use crate::jobs::{JobRegistry, ScanOutcome};
use crate::notify::telegram::TelegramSettings;
use crate::notify::Telegram;
use crate::publisher::Publisher;
use crate::refresh::{RefreshRunner, ReservationLock};
use crate::worker::{PoolConfig, TaskCompletion, WorkerPool};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Builds the router over an assembled state. Kept separate from [`run`]
/// so tests can drive the same routes with substituted collaborators.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/scan", post(services::scan))
        .route("/job/{id}", get(services::job_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .merge(protected)
        .route("/health", get(services::health))
        .with_state(state)
        .layer(RequestDecompressionLayer::new())
        .layer(CorsLayer::permissive())
}

/// `X-API-Key` guard for everything except `/health`. An empty
/// configured key disables the check (local development).
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = &state.config.app.api_key;
    if !expected.is_empty() {
        let provided = request
            .headers()
            .get("X-API-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if provided != expected {
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

pub async fn run(config: Config) -> Result<(), AnyError> {
    let config = Arc::new(config);

    // Cache: required. A dead cache fails every submission anyway.
    info!(addr = %config.redis.addr, "connecting to cache");
    let cache: Arc<dyn ConfigCache> = Arc::new(
        RedisCache::connect(
            &config.redis.addr,
            &config.redis.password,
            config.redis.db,
            config.redis.dedup_ttl(),
        )
        .await
        .map_err(|e| format!("cache connection failed: {e}"))?,
    );

    // Publisher: required, with a connectivity check before serving.
    if !config.github.is_configured() {
        return Err("GITHUB_OWNER, GITHUB_REPO, and SSH_KEY_PATH must be set".into());
    }
    if config.app.encryption_key.len() != 32 {
        return Err("ENCRYPTION_KEY must be exactly 32 bytes".into());
    }
    let publisher = Arc::new(Publisher::new(
        Arc::clone(&cache),
        &config.github.owner,
        &config.github.repo,
        std::path::Path::new(&config.github.ssh_key_path),
        config.app.encryption_key.clone().into_bytes(),
    )?);
    publisher
        .health_check()
        .await
        .map_err(|e| format!("artifact repository unreachable: {e}"))?;
    info!(
        repo = %format!("{}/{}", config.github.owner, config.github.repo),
        "publisher ready"
    );

    // Scanner over the external proxy engine.
    let (check_host, check_port) = config.app.check_target();
    let geo = geoip::resolver_from(config.app.mmdb_path.as_deref());
    let scanner = Arc::new(Scanner::new(
        Arc::new(XrayEngine::new(&config.app.xray_bin)),
        geo,
        ScannerOptions {
            check_timeout: Some(config.app.check_timeout()),
            check_host: Some(check_host),
            check_port: Some(check_port),
            max_concurrent: (config.app.max_concurrent > 0)
                .then_some(config.app.max_concurrent),
            remark: Some(RemarkTemplate {
                org_name: config.app.org_name.clone(),
                separator: config.app.remark_separator.clone(),
                ..Default::default()
            }),
        },
    ));

    // Worker pool with the publisher wired into its result handler.
    let pool = Arc::new(WorkerPool::new(PoolConfig {
        worker_count: config.worker.count,
        queue_size: config.worker.queue_size,
    }));
    pool.start().await?;
    install_result_handler(&pool, Arc::clone(&cache), Arc::clone(&publisher), &config);

    let registry = Arc::new(JobRegistry::new());
    let lock = ReservationLock::new();

    // Notification sidecar, if configured.
    let notifier = Telegram::spawn(TelegramSettings {
        bot_token: config.telegram.bot_token.clone(),
        channel: config.telegram.channel.clone(),
        template: config.telegram.template.clone(),
        proxy_url: config.telegram.proxy_url.clone(),
        sending_interval: config.telegram.sending_interval(),
    });
    let on_success = notifier.map(|telegram| {
        let hook: crate::jobs::SuccessHook =
            Arc::new(move |result| telegram.notify(result));
        hook
    });

    // Background refresh loop.
    tokio::spawn(
        RefreshRunner {
            interval: config.app.refresh_interval(),
            lock: lock.clone(),
            publisher: Arc::clone(&publisher),
            cache: Arc::clone(&cache),
            pool: Arc::clone(&pool),
            registry: Arc::clone(&registry),
            scanner: Arc::clone(&scanner),
        }
        .run(),
    );

    let state = AppState {
        config: Arc::clone(&config),
        scanner,
        registry,
        cache,
        pool: Arc::clone(&pool),
        lock,
        on_success,
    };
    let app = build_router(state);

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "proxybox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.stop().await;
    info!("shutdown complete");
    Ok(())
}

/// The pool's single result handler: persist the batch for the
/// publisher, then dispatch merge or replace by job-id prefix. Publisher
/// failures are logged and never touch the job record.
fn install_result_handler(
    pool: &WorkerPool<ScanOutcome>,
    cache: Arc<dyn ConfigCache>,
    publisher: Arc<Publisher>,
    config: &Arc<Config>,
) {
    let result_ttl = config.redis.result_ttl();
    pool.set_result_handler(move |completion: TaskCompletion<ScanOutcome>| {
        let outcome = match completion.result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(task_id = %completion.task_id, error = %e, "task failed");
                return;
            }
        };
        let cache = Arc::clone(&cache);
        let publisher = Arc::clone(&publisher);

        tokio::spawn(async move {
            let record = ScanRecord {
                job_id: outcome.job_id.clone(),
                timestamp: chrono::Utc::now(),
                results: outcome.results,
            };
            if let Err(e) = cache.store_results(&record, result_ttl).await {
                error!(job_id = %record.job_id, error = %e, "failed to store scan results");
                return;
            }

            let is_refresh = record.job_id.starts_with(crate::jobs::REFRESH_PREFIX);
            let published = if is_refresh {
                publisher.process_refresh_results(&record.job_id).await
            } else {
                publisher.process_scan_results(&record.job_id).await
            };
            match published {
                Ok(()) => info!(job_id = %record.job_id, is_refresh, "results published"),
                Err(e) => {
                    error!(job_id = %record.job_id, error = %e, "failed to publish results")
                }
            }
        });
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("shutdown signal received");
}
