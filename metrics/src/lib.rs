//! Gantry Metrics: atomic counters, a Prometheus exposition endpoint, and
//! the aggregated multi-region health endpoint (spec.md §4.8).

pub mod http;
pub mod registry;

pub use http::HealthMonitor;
pub use registry::MetricsRegistry;
