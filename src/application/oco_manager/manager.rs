//! OCO pair state machine and event consumption loop (`spec.md` §4.4).
//!
//! Transitions on a given `group_id` always run under lock
//! `oco:{group_id}`, matching the Dispatcher's `signal:{fingerprint}`
//! locking discipline in `application::lock_manager`. Redelivered events
//! are absorbed by `StateStore::mark_event_seen`, which persists the
//! `(exchange_order_id, sequence)` pair so the guard survives a restart,
//! and by checking a second `OneFilled` event's order id against the
//! pair's recorded sibling rather than assuming it confirms the cancel.
//!
//! Every order's terminal status, not just legs belonging to an armed
//! pair, reverses the Risk Manager's exposure bookkeeping
//! (`PositionView`, `StrategyActivityTracker`) that was reserved at
//! placement time (`spec.md` §4.2).

use crate::application::lock_manager::{with_lock, DistributedLockManager};
use crate::application::risk::{PositionView, StrategyActivityTracker};
use crate::domain::oco::{OcoPair, OcoState};
use crate::domain::order::{Order, OrderStatus, OrderType};
use crate::domain::ports::{
    AuditEntry, AuditKind, AuditSink, CancelOutcome, ExchangeGateway, ExchangeOrderStatus,
    FillEvent, StateStore,
};
use crate::infrastructure::core::retry::{retry_with_backoff, RetryPolicy};
use crate::infrastructure::observability::Metrics;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct OcoManager {
    lock_manager: Arc<DistributedLockManager>,
    state_store: Arc<dyn StateStore>,
    audit_sink: Arc<dyn AuditSink>,
    gateway: Arc<dyn ExchangeGateway>,
    position_view: Arc<PositionView>,
    strategy_activity: Arc<StrategyActivityTracker>,
    cancel_retry: RetryPolicy,
    lock_ttl: Duration,
    metrics: Option<Metrics>,
}

impl OcoManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lock_manager: Arc<DistributedLockManager>,
        state_store: Arc<dyn StateStore>,
        audit_sink: Arc<dyn AuditSink>,
        gateway: Arc<dyn ExchangeGateway>,
        position_view: Arc<PositionView>,
        strategy_activity: Arc<StrategyActivityTracker>,
        cancel_retry: RetryPolicy,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            lock_manager,
            state_store,
            audit_sink,
            gateway,
            position_view,
            strategy_activity,
            cancel_retry,
            lock_ttl,
            metrics: None,
        }
    }

    /// Attaches a `Metrics` instance so OCO state transitions are
    /// counted. Optional — tests may omit it.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Called by the Dispatcher once a pair reaches `armed`. There is no
    /// separate in-memory registry to maintain — the State Store is
    /// authoritative — so this is presently a hook for observability.
    pub async fn register(&self, pair: OcoPair) {
        info!(oco.group_id = %pair.group_id, oco.symbol = %pair.symbol, "OCO pair armed");
    }

    /// Drains the Exchange Gateway's event stream until the channel
    /// closes. Intended to run as its own worker task, distinct from the
    /// dispatch-worker pool (`spec.md` §5 / DESIGN NOTES §9).
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<FillEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    pub async fn handle_event(&self, event: FillEvent) {
        match self
            .state_store
            .mark_event_seen(&event.exchange_order_id, event.sequence)
            .await
        {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!(exchange_order_id = %event.exchange_order_id, error = %err, "failed to record event dedup key, processing anyway");
            }
        }

        let order_id = match self
            .state_store
            .get_order_by_exchange_id(&event.exchange_order_id)
            .await
        {
            Ok(Some(order_id)) => order_id,
            Ok(None) => return,
            Err(err) => {
                warn!(exchange_order_id = %event.exchange_order_id, error = %err, "order lookup failed for fill event");
                return;
            }
        };

        let Some(order) = self.update_order_status(order_id, event.new_status).await else {
            return;
        };
        self.reverse_exposure(&order, &event).await;

        let Some(group_id) = order.oco_group_id.clone() else {
            return;
        };

        let lock_name = format!("oco:{group_id}");
        let holder_id = format!("oco-manager-{}", ulid::Ulid::new());

        let _ = with_lock(&self.lock_manager, &lock_name, self.lock_ttl, &holder_id, || async {
            self.transition_under_lock(&group_id, order_id, &event).await;
        })
        .await;
    }

    /// Reverses the reservation the Dispatcher made at placement
    /// (`PositionView::reserve_notional`, `StrategyActivityTracker::
    /// increment_open_orders`) once an order reaches a terminal status,
    /// and folds fills into the position's net quantity. OCO legs never
    /// reserve notional of their own — only the entry order does — so
    /// only the entry order's terminal status releases it.
    async fn reverse_exposure(&self, order: &Order, event: &FillEvent) {
        let is_fill = matches!(
            event.new_status,
            ExchangeOrderStatus::Filled | ExchangeOrderStatus::PartiallyFilled
        ) && event.fill_qty > Default::default();
        if is_fill {
            if let Some(price) = event.fill_price {
                self.position_view
                    .apply_fill(&order.symbol, order.side, event.fill_qty, price);
            }
        }

        let is_leg = matches!(order.order_type, OrderType::Stop | OrderType::TakeProfit);
        let reached_terminal = matches!(
            event.new_status,
            ExchangeOrderStatus::Filled | ExchangeOrderStatus::Cancelled | ExchangeOrderStatus::Rejected
        );
        if reached_terminal && !is_leg {
            self.position_view.release_notional(&order.symbol, order.notional());
            if !order.originating_strategy_id.is_empty() {
                self.strategy_activity
                    .decrement_open_orders(&order.originating_strategy_id);
            }
        }
    }

    async fn transition_under_lock(
        &self,
        group_id: &str,
        order_id: crate::domain::order::OrderId,
        event: &FillEvent,
    ) {
        let Ok(Some(mut pair)) = self.state_store.get_oco_pair(group_id).await else {
            return;
        };
        if pair.state.is_terminal() {
            return;
        }

        let is_fill = matches!(
            event.new_status,
            ExchangeOrderStatus::Filled | ExchangeOrderStatus::PartiallyFilled
        ) && event.fill_qty > Default::default();
        if !is_fill {
            return;
        }

        match pair.state {
            OcoState::Arming | OcoState::Armed => {
                pair.transition(OcoState::OneFilled);
                pair.filled_order_id = Some(order_id);
                let _ = self.state_store.put_oco_pair(&pair).await;
                self.record_transition(&pair, "one_filled").await;

                let Some(sibling_id) = pair.sibling_of(order_id) else {
                    return;
                };
                self.cancel_sibling(&mut pair, sibling_id).await;
            }
            OcoState::OneFilled => {
                match pair.filled_order_id {
                    Some(filled_id) if filled_id == order_id => {
                        // Redelivery of the already-filled leg's event; the
                        // sibling has not actually been confirmed cancelled.
                    }
                    Some(filled_id) if pair.sibling_of(filled_id) == Some(order_id) => {
                        pair.transition(OcoState::Completed);
                        let _ = self.state_store.put_oco_pair(&pair).await;
                        self.record_transition(&pair, "completed").await;
                    }
                    _ => {
                        warn!(oco.group_id = %pair.group_id, "fill event for order outside this pair while one_filled, ignoring");
                    }
                }
            }
            OcoState::Completed | OcoState::Failed => {}
        }
    }

    async fn cancel_sibling(&self, pair: &mut OcoPair, sibling_id: crate::domain::order::OrderId) {
        let Ok(Some(sibling_order)) = self.state_store.get_order(sibling_id).await else {
            pair.transition(OcoState::Failed);
            let _ = self.state_store.put_oco_pair(pair).await;
            self.emit_alert(pair, "sibling order record missing").await;
            return;
        };
        let Some(exchange_order_id) = sibling_order.exchange_order_id.clone() else {
            pair.transition(OcoState::Failed);
            let _ = self.state_store.put_oco_pair(pair).await;
            self.emit_alert(pair, "sibling order has no exchange order id").await;
            return;
        };

        let gateway = self.gateway.clone();
        let result = retry_with_backoff(self.cancel_retry, "oco.cancel_sibling", || {
            let gateway = gateway.clone();
            let exchange_order_id = exchange_order_id.clone();
            async move { gateway.cancel(&exchange_order_id).await }
        })
        .await;

        match result {
            Ok(CancelOutcome::Cancelled) | Ok(CancelOutcome::NotFound) => {
                pair.transition(OcoState::Completed);
                let _ = self.state_store.put_oco_pair(pair).await;
                self.record_transition(pair, "completed").await;
            }
            Err(err) => {
                pair.transition(OcoState::Failed);
                let _ = self.state_store.put_oco_pair(pair).await;
                self.emit_alert(pair, &format!("sibling cancel exhausted retry budget: {err}"))
                    .await;
            }
        }
    }

    async fn update_order_status(
        &self,
        order_id: crate::domain::order::OrderId,
        status: ExchangeOrderStatus,
    ) -> Option<Order> {
        let mut order = match self.state_store.get_order(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) | Err(_) => return None,
        };
        order.status = match status {
            ExchangeOrderStatus::Filled => OrderStatus::Filled,
            ExchangeOrderStatus::PartiallyFilled => OrderStatus::PartiallyFilled,
            ExchangeOrderStatus::Cancelled => OrderStatus::Cancelled,
            ExchangeOrderStatus::Rejected => OrderStatus::Rejected,
            ExchangeOrderStatus::Accepted => OrderStatus::Accepted,
        };
        order.updated_at = Utc::now();
        if let Err(err) = self.state_store.put_order(&order).await {
            warn!(order_id = %order_id, error = %err, "failed to persist order status update");
        }
        Some(order)
    }

    async fn record_transition(&self, pair: &OcoPair, outcome: &str) {
        let entry = AuditEntry {
            event_id: self.audit_sink.next_event_id(),
            timestamp: Utc::now(),
            kind: AuditKind::OcoTransition,
            signal_fingerprint: None,
            order_id: None,
            exchange_order_id: None,
            oco_group_id: Some(pair.group_id.to_string()),
            outcome: outcome.to_string(),
            reason: None,
            payload: serde_json::json!({ "symbol": pair.symbol, "state": pair.state }),
        };
        if let Err(err) = self.audit_sink.record(entry).await {
            error!(error = %err, "failed to record OCO transition");
        }
        if let Some(metrics) = &self.metrics {
            metrics.oco_transitions_total.with_label_values(&[outcome]).inc();
        }
    }

    async fn emit_alert(&self, pair: &OcoPair, reason: &str) {
        let entry = AuditEntry {
            event_id: self.audit_sink.next_event_id(),
            timestamp: Utc::now(),
            kind: AuditKind::Alert,
            signal_fingerprint: None,
            order_id: None,
            exchange_order_id: None,
            oco_group_id: Some(pair.group_id.to_string()),
            outcome: "oco_failed".into(),
            reason: Some(reason.to_string()),
            payload: serde_json::json!({ "symbol": pair.symbol }),
        };
        if let Err(err) = self.audit_sink.record(entry).await {
            error!(error = %err, "failed to record OCO failure alert");
        }
        if let Some(metrics) = &self.metrics {
            metrics.oco_transitions_total.with_label_values(&["failed"]).inc();
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::lock_manager::DistributedLockManager;
    use crate::domain::oco::OcoSide;
    use crate::domain::order::{Order, OrderType, OrderSide};
    use crate::domain::signal::SignalFingerprint;
    use crate::infrastructure::audit::in_memory::InMemoryAuditSink;
    use crate::infrastructure::exchange::mock::MockExchangeGateway;
    use crate::infrastructure::state_store::in_memory::InMemoryStateStore;
    use rust_decimal_macros::dec;

    async fn armed_pair_fixture() -> (
        Arc<OcoManager>,
        Arc<InMemoryStateStore>,
        Arc<MockExchangeGateway>,
        OcoPair,
    ) {
        let store = Arc::new(InMemoryStateStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let gateway = Arc::new(MockExchangeGateway::new());
        let lock_manager = Arc::new(DistributedLockManager::new(store.clone()));

        let fp = SignalFingerprint("ema|BTCUSDT|buy|50000|1h|0".into());
        let mut stop = Order::new("BTCUSDT", OrderSide::Sell, OrderType::Stop, dec!(0.01), Some(dec!(49000)), fp.clone(), "ema-cross");
        let mut tp = Order::new("BTCUSDT", OrderSide::Sell, OrderType::TakeProfit, dec!(0.01), Some(dec!(51000)), fp.clone(), "ema-cross");

        let (_, stop_exchange_id) = gateway
            .place(&crate::domain::ports::GatewayOrderRequest {
                client_order_id: stop.order_id,
                symbol: stop.symbol.clone(),
                side: stop.side,
                order_type: stop.order_type,
                quantity: stop.quantity,
                price: stop.price,
            })
            .await
            .unwrap();
        let (_, tp_exchange_id) = gateway
            .place(&crate::domain::ports::GatewayOrderRequest {
                client_order_id: tp.order_id,
                symbol: tp.symbol.clone(),
                side: tp.side,
                order_type: tp.order_type,
                quantity: tp.quantity,
                price: tp.price,
            })
            .await
            .unwrap();

        let mut pair = OcoPair::new("BTCUSDT", OcoSide::Sell, stop.order_id, tp.order_id);
        pair.transition(OcoState::Armed);

        stop.status = OrderStatus::Accepted;
        stop.exchange_order_id = Some(stop_exchange_id);
        stop.oco_group_id = Some(pair.group_id.to_string());
        tp.status = OrderStatus::Accepted;
        tp.exchange_order_id = Some(tp_exchange_id);
        tp.oco_group_id = Some(pair.group_id.to_string());

        store.put_order(&stop).await.unwrap();
        store.put_order(&tp).await.unwrap();
        store.put_oco_pair(&pair).await.unwrap();

        let manager = Arc::new(OcoManager::new(
            lock_manager,
            store.clone(),
            audit,
            gateway.clone(),
            Arc::new(crate::application::risk::PositionView::new()),
            Arc::new(crate::application::risk::StrategyActivityTracker::new()),
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_secs(30),
        ));

        (manager, store, gateway, pair)
    }

    #[tokio::test]
    async fn fill_on_one_leg_cancels_sibling_and_completes() {
        let (manager, store, gateway, pair) = armed_pair_fixture().await;
        let stop_order = store.get_order(pair.stop_order_id).await.unwrap().unwrap();
        let stop_exchange_id = stop_order.exchange_order_id.clone().unwrap();

        manager
            .handle_event(FillEvent {
                exchange_order_id: stop_exchange_id,
                sequence: 1,
                new_status: ExchangeOrderStatus::Filled,
                fill_qty: dec!(0.01),
                fill_price: Some(dec!(49000)),
                timestamp: Utc::now(),
            })
            .await;

        let updated = store.get_oco_pair(&pair.group_id.to_string()).await.unwrap().unwrap();
        assert_eq!(updated.state, OcoState::Completed);
        assert_eq!(gateway.cancel_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redelivered_event_does_not_cancel_twice() {
        let (manager, store, gateway, pair) = armed_pair_fixture().await;
        let stop_order = store.get_order(pair.stop_order_id).await.unwrap().unwrap();
        let stop_exchange_id = stop_order.exchange_order_id.clone().unwrap();

        let event = FillEvent {
            exchange_order_id: stop_exchange_id,
            sequence: 1,
            new_status: ExchangeOrderStatus::Filled,
            fill_qty: dec!(0.01),
            fill_price: Some(dec!(49000)),
            timestamp: Utc::now(),
        };
        manager.handle_event(event.clone()).await;
        manager.handle_event(event).await;

        assert_eq!(gateway.cancel_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redelivered_event_for_already_filled_leg_does_not_complete_without_sibling() {
        let (manager, store, _gateway, mut pair) = armed_pair_fixture().await;
        let stop_order = store.get_order(pair.stop_order_id).await.unwrap().unwrap();
        let stop_exchange_id = stop_order.exchange_order_id.clone().unwrap();

        // Force the pair into `one_filled` as if the stop leg already
        // filled and its sibling-cancel confirmation was lost across a
        // restart, without going through the real cancel flow.
        pair.transition(OcoState::OneFilled);
        pair.filled_order_id = Some(pair.stop_order_id);
        store.put_oco_pair(&pair).await.unwrap();

        manager
            .handle_event(FillEvent {
                exchange_order_id: stop_exchange_id,
                sequence: 99,
                new_status: ExchangeOrderStatus::Filled,
                fill_qty: dec!(0.01),
                fill_price: Some(dec!(49000)),
                timestamp: Utc::now(),
            })
            .await;

        let updated = store.get_oco_pair(&pair.group_id.to_string()).await.unwrap().unwrap();
        assert_eq!(updated.state, OcoState::OneFilled);
    }

    #[tokio::test]
    async fn events_outside_any_known_pair_are_ignored() {
        let (manager, _store, gateway, _pair) = armed_pair_fixture().await;
        manager
            .handle_event(FillEvent {
                exchange_order_id: "EX-unknown".into(),
                sequence: 1,
                new_status: ExchangeOrderStatus::Filled,
                fill_qty: dec!(1),
                fill_price: Some(dec!(1)),
                timestamp: Utc::now(),
            })
            .await;
        assert_eq!(gateway.cancel_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
