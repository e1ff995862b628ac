//! Prometheus metrics definitions, grounded on the reference engine's
//! `Metrics` (`rustrade_*` registration pattern) but covering the
//! dispatcher subsystem's own counters (SPEC_FULL.md §6.2).

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub dispatch_total: CounterVec,
    pub oco_transitions_total: CounterVec,
    pub lock_acquire_total: CounterVec,
    pub exchange_call_latency_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let dispatch_total = CounterVec::new(
            Opts::new(
                "dispatch_core_dispatch_total",
                "Total dispatch attempts by terminal outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(dispatch_total.clone()))?;

        let oco_transitions_total = CounterVec::new(
            Opts::new(
                "dispatch_core_oco_transitions_total",
                "Total OCO pair state transitions",
            ),
            &["to_state"],
        )?;
        registry.register(Box::new(oco_transitions_total.clone()))?;

        let lock_acquire_total = CounterVec::new(
            Opts::new(
                "dispatch_core_lock_acquire_total",
                "Total lock acquire attempts by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(lock_acquire_total.clone()))?;

        let exchange_call_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_core_exchange_call_latency_seconds",
                "Exchange Gateway call latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["op"],
        )?;
        registry.register(Box::new(exchange_call_latency_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            dispatch_total,
            oco_transitions_total,
            lock_acquire_total,
            exchange_call_latency_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_registers_all_metrics_without_name_collisions() {
        let metrics = Metrics::new().unwrap();
        metrics.dispatch_total.with_label_values(&["executed"]).inc();
        assert_eq!(
            metrics
                .dispatch_total
                .with_label_values(&["executed"])
                .get(),
            1.0
        );
    }
}
