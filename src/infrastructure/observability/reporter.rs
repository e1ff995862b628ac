//! Push-based metrics reporter: periodically writes a structured JSON
//! snapshot, grounded on the reference engine's `MetricsReporter`
//! (no HTTP server, outbound-only, per `spec.md` §1's excluded HTTP
//! surface).

use prometheus::proto::MetricFamily;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

use super::metrics::Metrics;

#[derive(Serialize)]
struct MetricsSnapshot {
    uptime_seconds: u64,
    families: Vec<FamilySnapshot>,
}

#[derive(Serialize)]
struct FamilySnapshot {
    name: String,
    samples: Vec<SampleSnapshot>,
}

#[derive(Serialize)]
struct SampleSnapshot {
    labels: Vec<(String, String)>,
    value: f64,
}

pub struct MetricsReporter {
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval: Duration) -> Self {
        Self {
            metrics,
            start_time: Instant::now(),
            interval,
        }
    }

    /// Runs until the process exits; intended to be spawned as its own
    /// task by the composition root.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "metrics reporter started");
        loop {
            tokio::time::sleep(self.interval).await;
            let snapshot = self.collect_snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => println!("METRICS_JSON:{json}"),
                Err(err) => tracing::warn!(error = %err, "failed to serialize metrics snapshot"),
            }
        }
    }

    fn collect_snapshot(&self) -> MetricsSnapshot {
        let families = self.metrics.registry().gather();
        MetricsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            families: families.iter().map(family_snapshot).collect(),
        }
    }
}

fn family_snapshot(family: &MetricFamily) -> FamilySnapshot {
    let samples = family
        .get_metric()
        .iter()
        .map(|metric| {
            let labels = metric
                .get_label()
                .iter()
                .map(|l| (l.get_name().to_string(), l.get_value().to_string()))
                .collect();
            let value = if metric.has_counter() {
                metric.get_counter().get_value()
            } else if metric.has_gauge() {
                metric.get_gauge().get_value()
            } else if metric.has_histogram() {
                metric.get_histogram().get_sample_sum()
            } else {
                0.0
            };
            SampleSnapshot { labels, value }
        })
        .collect();

    FamilySnapshot {
        name: family.get_name().to_string(),
        samples,
    }
}
