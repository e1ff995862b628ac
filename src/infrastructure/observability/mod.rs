//! Metrics collection and push-based reporting (SPEC_FULL.md §6.2).

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
