//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. `level` comes from `LOG_LEVEL` and
/// accepts anything an `EnvFilter` does; `RUST_LOG` wins when set.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
