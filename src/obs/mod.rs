//! Ambient observability: logging setup and lightweight instrumentation.

pub mod metrics;
pub mod queues;
pub mod tracing_layer;

pub use metrics::LatencyHistogram;
pub use tracing_layer::{init_tracing, TracingConfig};
