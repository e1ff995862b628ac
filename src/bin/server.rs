//! Dispatcher daemon — headless composition root. Wires concrete
//! adapters into the Dispatcher/OCO Manager/Reconciler, spawns the
//! worker pools, and runs until a shutdown signal arrives.
//!
//! No HTTP surface, no message-bus wiring: those are external
//! collaborators per `spec.md` §1. Metrics are pushed as structured
//! JSON log lines, matching the reference engine's headless server.

use anyhow::Result;
use dispatch_core::application::dispatcher::Dispatcher;
use dispatch_core::application::lock_manager::DistributedLockManager;
use dispatch_core::application::oco_manager::OcoManager;
use dispatch_core::application::reconciler::Reconciler;
use dispatch_core::application::risk::{PositionView, StrategyActivityTracker};
use dispatch_core::application::workers::{dispatch_pool, event_pool};
use dispatch_core::config::Config;
use dispatch_core::domain::ports::{AuditSink, ExchangeGateway, StateStore};
use dispatch_core::domain::signal::Signal;
use dispatch_core::infrastructure::audit::jsonl::JsonlAuditSink;
use dispatch_core::infrastructure::exchange::mock::MockExchangeGateway;
use dispatch_core::infrastructure::observability::{Metrics, MetricsReporter};
use dispatch_core::infrastructure::state_store::sqlite::SqliteStateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let env_filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());
    if log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty().with_target(false))
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "dispatcher core starting");

    let config = Config::from_env()?;

    let state_store: Arc<dyn StateStore> =
        Arc::new(SqliteStateStore::connect(&config.database_url).await?);
    let audit_sink: Arc<dyn AuditSink> =
        Arc::new(JsonlAuditSink::open(&config.audit_log_path).await?);
    let gateway: Arc<dyn ExchangeGateway> = Arc::new(MockExchangeGateway::new());

    let metrics = Metrics::new()?;

    let lock_manager = Arc::new(
        DistributedLockManager::new(state_store.clone()).with_metrics(metrics.clone()),
    );
    let position_view = Arc::new(PositionView::new());
    let strategy_activity = Arc::new(StrategyActivityTracker::new());

    let oco_manager = Arc::new(
        OcoManager::new(
            lock_manager.clone(),
            state_store.clone(),
            audit_sink.clone(),
            gateway.clone(),
            position_view.clone(),
            strategy_activity.clone(),
            config.oco.cancel_retry,
            config.lock.default_ttl,
        )
        .with_metrics(metrics.clone()),
    );

    let dispatcher = Arc::new(
        Dispatcher::new(
            lock_manager,
            state_store.clone(),
            audit_sink.clone(),
            gateway.clone(),
            oco_manager.clone(),
            position_view,
            strategy_activity,
            config.risk.clone(),
            config.exec.clone(),
            config.lock.default_ttl,
            config.dedup.retention_hours,
        )
        .with_metrics(metrics.clone()),
    );

    let reconciler = Reconciler::new(
        state_store.clone(),
        gateway.clone(),
        audit_sink.clone(),
        oco_manager.clone(),
    );
    match reconciler.reconcile().await {
        Ok(report) => info!(
            orders_recovered = report.orders_recovered,
            orders_unresolved = report.orders_unresolved,
            oco_pairs_resubscribed = report.oco_pairs_resubscribed,
            "startup reconciliation complete"
        ),
        Err(err) => tracing::error!(error = %err, "startup reconciliation failed"),
    }

    let event_rx = gateway.subscribe_events().await;
    let event_task = event_pool::spawn(oco_manager.clone(), event_rx);

    let (signal_tx, signal_rx) = mpsc::channel::<Signal>(1024);
    let dispatch_tasks = dispatch_pool::spawn(dispatcher, signal_rx, config.exec.dispatch_workers);
    drop(signal_tx); // No message-bus wiring in this binary; ingress is out of scope (`spec.md` §1).

    let reporter = MetricsReporter::new(metrics, Duration::from_secs(60));
    let reporter_task = tokio::spawn(reporter.run());

    let reconciler_interval = Duration::from_millis(config.reconciler_poll_interval_ms);
    let reconciler_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(reconciler_interval);
        loop {
            interval.tick().await;
            if let Err(err) = reconciler.reconcile().await {
                tracing::error!(error = %err, "periodic reconciliation failed");
            }
        }
    });

    info!("dispatcher core running, press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping ingress and draining in-flight dispatches");

    // No further signals are accepted once the ingress channel is
    // dropped; dispatch workers finish whatever they've already pulled
    // off it and then return on their own once it closes.
    reporter_task.abort();
    reconciler_task.abort();
    event_task.abort();

    let grace_period = config.exec.shutdown_grace_period;
    let abort_handles: Vec<_> = dispatch_tasks.iter().map(|task| task.abort_handle()).collect();
    match tokio::time::timeout(grace_period, futures::future::join_all(dispatch_tasks)).await {
        Ok(_) => info!("all dispatch workers drained cleanly"),
        Err(_) => {
            warn!(
                grace_period_ms = grace_period.as_millis() as u64,
                "dispatch workers did not drain within grace period, aborting remaining work"
            );
            for handle in abort_handles {
                handle.abort();
            }
        }
    }

    Ok(())
}
