//! Tracing setup for the runtime core.
//!
//! Structured logging only; no metrics-exposition format is defined here (that is
//! an external collaborator's concern).

use tracing_subscriber::{prelude::*, EnvFilter};

/// Configuration for the crate's tracing subscriber.
pub struct TracingConfig {
    /// `RUST_LOG`-style filter string; falls back to `info` when unset.
    pub filter: Option<String>,
    pub with_thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            with_thread_ids: true,
        }
    }
}

impl TracingConfig {
    pub fn from_env() -> Self {
        Self {
            filter: std::env::var("VELOZ_LOG").ok(),
            with_thread_ids: true,
        }
    }
}

/// Installs the global tracing subscriber. Call once at process start; tests that
/// need log output can call this too, ignoring the "already set" error.
pub fn init_tracing(config: TracingConfig) {
    let filter = config
        .filter
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(config.with_thread_ids);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
