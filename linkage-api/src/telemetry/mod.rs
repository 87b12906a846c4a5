//! LINKAGE Telemetry - Observability Infrastructure
//!
//! Structured logging through `tracing-subscriber` and Prometheus metrics
//! for the HTTP layer and the contact store.

pub mod metrics;
pub mod middleware;
pub mod store;
pub mod tracer;

pub use metrics::{metrics_handler, LinkageMetrics, METRICS};
pub use middleware::observability_middleware;
pub use store::InstrumentedStore;
pub use tracer::{init_tracing, LogFormat, TelemetryConfig, DEFAULT_FILTER};
