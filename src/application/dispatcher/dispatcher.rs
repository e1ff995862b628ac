//! The Dispatcher: orchestrates a signal's journey from ingress to
//! exchange submission (`spec.md` §4.3). This is the busiest module in
//! the crate by design — every other component exists to be called from
//! here in a fixed order.

use super::result::DispatchResult;
use super::translate::{translate, OcoPlan, ProposedOrderPlan, TranslateError};
use crate::application::lock_manager::{AcquireOutcome, DistributedLockManager};
use crate::application::oco_manager::OcoManager;
use crate::application::risk::{self, PositionView, RiskConfig, StrategyActivityTracker};
use crate::config::ExecConfig;
use crate::domain::errors::GatewayError;
use crate::domain::lock::ProcessedSignalRecord;
use crate::domain::oco::OcoPair;
use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::ports::{AuditEntry, AuditKind, AuditSink, ExchangeGateway, GatewayOrderRequest, PlaceOutcome, StateStore};
use crate::domain::signal::{fingerprint, Signal};
use crate::infrastructure::core::retry::retry_with_backoff;
use crate::infrastructure::observability::Metrics;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use ulid::Ulid;

pub struct Dispatcher {
    lock_manager: Arc<DistributedLockManager>,
    state_store: Arc<dyn StateStore>,
    audit_sink: Arc<dyn AuditSink>,
    gateway: Arc<dyn ExchangeGateway>,
    oco_manager: Arc<OcoManager>,
    position_view: Arc<PositionView>,
    strategy_activity: Arc<StrategyActivityTracker>,
    risk_config: RiskConfig,
    exec_config: ExecConfig,
    lock_ttl: Duration,
    dedup_retention_hours: i64,
    metrics: Option<Metrics>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lock_manager: Arc<DistributedLockManager>,
        state_store: Arc<dyn StateStore>,
        audit_sink: Arc<dyn AuditSink>,
        gateway: Arc<dyn ExchangeGateway>,
        oco_manager: Arc<OcoManager>,
        position_view: Arc<PositionView>,
        strategy_activity: Arc<StrategyActivityTracker>,
        risk_config: RiskConfig,
        exec_config: ExecConfig,
        lock_ttl: Duration,
        dedup_retention_hours: i64,
    ) -> Self {
        Self {
            lock_manager,
            state_store,
            audit_sink,
            gateway,
            oco_manager,
            position_view,
            strategy_activity,
            risk_config,
            exec_config,
            lock_ttl,
            dedup_retention_hours,
            metrics: None,
        }
    }

    /// Attaches a `Metrics` instance so dispatch outcomes and exchange
    /// call latency are recorded. Optional — tests may omit it.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn dispatch(&self, signal: Signal) -> DispatchResult {
        // 1. Validate.
        if let Err(reason) = validate(&signal) {
            return self.finish(&signal, None, DispatchResult::Invalid { reason }).await;
        }

        // 2. Fingerprint.
        let fingerprint = fingerprint(&signal);

        // 3. Advisory dedup check (fast path, outside the lock).
        if self.is_duplicate(&fingerprint).await {
            return self.finish(&signal, Some(&fingerprint), DispatchResult::Duplicate).await;
        }

        // 4. Acquire the per-fingerprint lock.
        let holder_id = format!("dispatcher-{}", Ulid::new());
        let lock_name = format!("signal:{fingerprint}");
        let granted = match self
            .lock_manager
            .acquire(&lock_name, self.lock_ttl, &holder_id)
            .await
        {
            Ok(AcquireOutcome::Granted { .. }) => true,
            Ok(AcquireOutcome::Denied) => false,
            Err(err) => {
                warn!(fingerprint = %fingerprint, error = %err, "lock store unavailable, treating as denied");
                false
            }
        };
        if !granted {
            return self.finish(&signal, Some(&fingerprint), DispatchResult::LockDenied).await;
        }

        let result = self.dispatch_under_lock(&signal, &fingerprint).await;

        // 12. Release the lock regardless of outcome.
        if let Err(err) = self.lock_manager.release(&lock_name, &holder_id).await {
            warn!(fingerprint = %fingerprint, error = %err, "failed to release dispatch lock");
        }

        self.finish(&signal, Some(&fingerprint), result).await
    }

    async fn dispatch_under_lock(
        &self,
        signal: &Signal,
        fingerprint: &crate::domain::signal::SignalFingerprint,
    ) -> DispatchResult {
        // 5. Authoritative re-check under the lock.
        if self.is_duplicate(fingerprint).await {
            return DispatchResult::Duplicate;
        }

        let position = self.position_view.get(&signal.symbol);

        // 6-7. Translate and size.
        let plan = match translate(
            signal,
            &position,
            self.exec_config.default_target_notional,
            self.risk_config.min_order_notional,
        ) {
            Ok(plan) => plan,
            Err(TranslateError::NoActionableQuantity(reason)) => {
                return DispatchResult::Invalid { reason };
            }
        };

        // 8. Risk check the entry order (and each OCO leg, since both
        // are live orders consuming exposure once placed).
        if let Some(reason) = self.deny_reason(signal, &plan.entry, &position) {
            return DispatchResult::RiskRejected { reason: reason.to_string() };
        }
        if let Some(oco) = &plan.oco {
            if let Some(reason) = self.deny_reason(signal, &oco.stop, &position) {
                return DispatchResult::RiskRejected { reason: reason.to_string() };
            }
        }

        // 9. Submit to the exchange, with retry/backoff on transient
        // failures.
        let order = Order::new(
            plan.entry.symbol.clone(),
            plan.entry.side,
            plan.entry.order_type,
            plan.entry.quantity,
            plan.entry.price,
            fingerprint.clone(),
            signal.strategy_id.clone(),
        );

        let request = GatewayOrderRequest {
            client_order_id: order.order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            price: order.price,
        };

        let call_started = std::time::Instant::now();
        let place_result = retry_with_backoff(self.exec_config.retry, "exchange.place", || {
            let request = request.clone();
            let gateway = self.gateway.clone();
            async move { gateway.place(&request).await }
        })
        .await;
        if let Some(metrics) = &self.metrics {
            metrics
                .exchange_call_latency_seconds
                .with_label_values(&["place"])
                .observe(call_started.elapsed().as_secs_f64());
        }

        let (mut order, exchange_order_id) = match place_result {
            Ok((PlaceOutcome::Accepted, exchange_order_id)) => {
                order.status = OrderStatus::Accepted;
                order.exchange_order_id = Some(exchange_order_id.clone());
                order.updated_at = Utc::now();
                (order, exchange_order_id)
            }
            Err(GatewayError::Rejected { reason }) => {
                return DispatchResult::ExchangeFailed { reason };
            }
            Err(GatewayError::Transient { reason }) => {
                return DispatchResult::ExchangeFailed { reason };
            }
            Err(GatewayError::NotFound { exchange_order_id }) => {
                return DispatchResult::ExchangeFailed {
                    reason: format!("unexpected not-found for {exchange_order_id}"),
                };
            }
        };

        self.position_view.reserve_notional(&order.symbol, plan.entry.notional());
        self.strategy_activity.increment_open_orders(&signal.strategy_id);

        // 10. Persist the order and, if present, the OCO pair; hand the
        // pair to the OCO Manager.
        let oco_group_id = match &plan.oco {
            Some(oco_plan) => match self
                .place_and_persist_oco_leg(oco_plan, fingerprint, &signal.strategy_id, &exchange_order_id)
                .await
            {
                Ok(group_id) => Some(group_id),
                Err(reason) => {
                    warn!(fingerprint = %fingerprint, reason = %reason, "failed to arm OCO pair");
                    None
                }
            },
            None => None,
        };
        order.oco_group_id = oco_group_id.clone();

        if let Err(err) = self.state_store.put_order(&order).await {
            error!(fingerprint = %fingerprint, error = %err, "failed to persist order after exchange acceptance");
            return DispatchResult::ExchangeFailed {
                reason: format!("state store write failed: {err}"),
            };
        }

        // 11. Write the dedup record.
        let now = Utc::now();
        let record = ProcessedSignalRecord {
            fingerprint: fingerprint.clone(),
            first_seen_at: now,
            expires_at: now + chrono::Duration::hours(self.dedup_retention_hours),
        };
        if let Err(err) = self.state_store.put_processed_signal(&record).await {
            warn!(fingerprint = %fingerprint, error = %err, "failed to persist dedup record");
        }

        DispatchResult::Executed { order_id: order.order_id }
    }

    /// Places both OCO legs, persists the pair, and hands it to the OCO
    /// Manager once armed (`spec.md` §4.4 `arming` state).
    async fn place_and_persist_oco_leg(
        &self,
        oco_plan: &OcoPlan,
        fingerprint: &crate::domain::signal::SignalFingerprint,
        strategy_id: &str,
        _entry_exchange_order_id: &str,
    ) -> Result<String, String> {
        let mut stop_order = Order::new(
            oco_plan.stop.symbol.clone(),
            oco_plan.stop.side,
            oco_plan.stop.order_type,
            oco_plan.stop.quantity,
            oco_plan.stop.price,
            fingerprint.clone(),
            strategy_id,
        );
        let mut tp_order = Order::new(
            oco_plan.take_profit.symbol.clone(),
            oco_plan.take_profit.side,
            oco_plan.take_profit.order_type,
            oco_plan.take_profit.quantity,
            oco_plan.take_profit.price,
            fingerprint.clone(),
            strategy_id,
        );

        let mut pair = OcoPair::new(
            oco_plan.stop.symbol.clone(),
            match oco_plan.stop.side {
                crate::domain::order::OrderSide::Buy => crate::domain::oco::OcoSide::Buy,
                crate::domain::order::OrderSide::Sell => crate::domain::oco::OcoSide::Sell,
            },
            stop_order.order_id,
            tp_order.order_id,
        );
        stop_order.oco_group_id = Some(pair.group_id.to_string());
        tp_order.oco_group_id = Some(pair.group_id.to_string());
        let _ = self.state_store.put_oco_pair(&pair).await;

        let stop_request = GatewayOrderRequest {
            client_order_id: stop_order.order_id,
            symbol: stop_order.symbol.clone(),
            side: stop_order.side,
            order_type: stop_order.order_type,
            quantity: stop_order.quantity,
            price: stop_order.price,
        };

        let stop_exchange_id = match self.gateway.place(&stop_request).await {
            Ok((_, exchange_id)) => exchange_id,
            Err(err) => {
                pair.transition(crate::domain::oco::OcoState::Failed);
                let _ = self.state_store.put_oco_pair(&pair).await;
                self.emit_oco_alert(&pair, "stop leg rejected during arming").await;
                return Err(err.to_string());
            }
        };
        stop_order.status = OrderStatus::Accepted;
        stop_order.exchange_order_id = Some(stop_exchange_id.clone());

        let tp_request = GatewayOrderRequest {
            client_order_id: tp_order.order_id,
            symbol: tp_order.symbol.clone(),
            side: tp_order.side,
            order_type: tp_order.order_type,
            quantity: tp_order.quantity,
            price: tp_order.price,
        };

        let tp_exchange_id = match self.gateway.place(&tp_request).await {
            Ok((_, exchange_id)) => exchange_id,
            Err(err) => {
                let _ = self.gateway.cancel(&stop_exchange_id).await;
                pair.transition(crate::domain::oco::OcoState::Failed);
                let _ = self.state_store.put_order(&stop_order).await;
                let _ = self.state_store.put_oco_pair(&pair).await;
                self.emit_oco_alert(&pair, "take-profit leg rejected during arming, stop leg cancelled").await;
                return Err(err.to_string());
            }
        };
        tp_order.status = OrderStatus::Accepted;
        tp_order.exchange_order_id = Some(tp_exchange_id);

        pair.transition(crate::domain::oco::OcoState::Armed);

        self.state_store
            .put_order(&stop_order)
            .await
            .map_err(|e| e.to_string())?;
        self.state_store
            .put_order(&tp_order)
            .await
            .map_err(|e| e.to_string())?;
        self.state_store
            .put_oco_pair(&pair)
            .await
            .map_err(|e| e.to_string())?;

        self.oco_manager.register(pair.clone()).await;

        Ok(pair.group_id.to_string())
    }

    async fn emit_oco_alert(&self, pair: &OcoPair, reason: &str) {
        let entry = AuditEntry {
            event_id: self.audit_sink.next_event_id(),
            timestamp: Utc::now(),
            kind: AuditKind::Alert,
            signal_fingerprint: None,
            order_id: None,
            exchange_order_id: None,
            oco_group_id: Some(pair.group_id.to_string()),
            outcome: "oco_arming_failed".into(),
            reason: Some(reason.to_string()),
            payload: serde_json::json!({ "symbol": pair.symbol }),
        };
        if let Err(err) = self.audit_sink.record(entry).await {
            error!(error = %err, "failed to record OCO arming alert");
        }
    }

    fn deny_reason(
        &self,
        signal: &Signal,
        order: &ProposedOrderPlan,
        position: &crate::domain::position::Position,
    ) -> Option<risk::DenyReason> {
        let strategy_orders_this_minute = self
            .strategy_activity
            .record_order_attempt(&signal.strategy_id, Utc::now());
        let strategy_open_orders = self.strategy_activity.open_order_count(&signal.strategy_id);

        let proposed = risk::ProposedOrder {
            symbol: &order.symbol,
            notional: order.notional(),
            confidence: signal.confidence,
            strategy_orders_this_minute,
            strategy_open_orders,
            aggregate_notional_excluding_symbol: self
                .position_view
                .aggregate_open_orders_notional_excluding(&order.symbol),
        };

        match risk::evaluate(&proposed, position, &self.risk_config) {
            risk::RiskVerdict::Allow => None,
            risk::RiskVerdict::Deny(reason) => Some(reason),
        }
    }

    async fn is_duplicate(&self, fingerprint: &crate::domain::signal::SignalFingerprint) -> bool {
        match self.state_store.get_processed_signal(fingerprint).await {
            Ok(Some(record)) => !record.is_expired_at(Utc::now()),
            Ok(None) => false,
            Err(err) => {
                warn!(fingerprint = %fingerprint, error = %err, "dedup lookup failed, proceeding optimistically");
                false
            }
        }
    }

    async fn finish(
        &self,
        signal: &Signal,
        fingerprint: Option<&crate::domain::signal::SignalFingerprint>,
        result: DispatchResult,
    ) -> DispatchResult {
        let reason = match &result {
            DispatchResult::RiskRejected { reason }
            | DispatchResult::ExchangeFailed { reason }
            | DispatchResult::Invalid { reason } => Some(reason.clone()),
            _ => None,
        };

        let order_id = match &result {
            DispatchResult::Executed { order_id } => Some(*order_id),
            _ => None,
        };

        let entry = AuditEntry {
            event_id: self.audit_sink.next_event_id(),
            timestamp: Utc::now(),
            kind: AuditKind::Dispatch,
            signal_fingerprint: fingerprint.cloned(),
            order_id,
            exchange_order_id: None,
            oco_group_id: None,
            outcome: result.label().to_string(),
            reason: reason.clone(),
            payload: serde_json::json!({ "strategy_id": signal.strategy_id, "symbol": signal.symbol }),
        };

        let result = match self.audit_sink.record(entry).await {
            Ok(()) => result,
            Err(err) => {
                error!(outcome = result.label(), error = %err, "audit write failed, failing dispatch");
                DispatchResult::ExchangeFailed {
                    reason: format!("audit write failed: {err}"),
                }
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.dispatch_total.with_label_values(&[result.label()]).inc();
        }

        match &result {
            DispatchResult::Executed { order_id } => {
                info!(fingerprint = ?fingerprint, outcome = "executed", order_id = %order_id, "dispatch completed");
            }
            DispatchResult::RiskRejected { reason } | DispatchResult::ExchangeFailed { reason } => {
                warn!(fingerprint = ?fingerprint, outcome = result.label(), reason = %reason, "dispatch completed");
            }
            _ => {
                info!(fingerprint = ?fingerprint, outcome = result.label(), "dispatch completed");
            }
        }

        result
    }
}

fn validate(signal: &Signal) -> Result<(), String> {
    if signal.strategy_id.trim().is_empty() {
        return Err("strategy_id must not be empty".into());
    }
    if signal.symbol.trim().is_empty() {
        return Err("symbol must not be empty".into());
    }
    if !(0.0..=1.0).contains(&signal.confidence) {
        return Err("confidence must be within [0, 1]".into());
    }
    if let Some(price) = signal.price {
        if price <= Decimal::ZERO {
            return Err("price must be positive".into());
        }
    }
    if let Some(quantity) = signal.quantity {
        if quantity <= Decimal::ZERO {
            return Err("quantity must be positive".into());
        }
    }
    Ok(())
}
