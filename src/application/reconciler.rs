//! Crash-recovery reconciler (`spec.md` §4.3 crash-recovery note,
//! SPEC_FULL.md §4.7). Runs once at startup and may be invoked
//! periodically thereafter.

use crate::application::oco_manager::OcoManager;
use crate::domain::oco::OcoState;
use crate::domain::order::{OrderId, OrderStatus};
use crate::domain::ports::{AuditSink, ExchangeGateway, StateStore};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Reconciler {
    state_store: Arc<dyn StateStore>,
    gateway: Arc<dyn ExchangeGateway>,
    audit_sink: Arc<dyn AuditSink>,
    oco_manager: Arc<OcoManager>,
}

impl Reconciler {
    pub fn new(
        state_store: Arc<dyn StateStore>,
        gateway: Arc<dyn ExchangeGateway>,
        audit_sink: Arc<dyn AuditSink>,
        oco_manager: Arc<OcoManager>,
    ) -> Self {
        Self {
            state_store,
            gateway,
            audit_sink,
            oco_manager,
        }
    }

    /// Completes persistence for orders the exchange confirms it
    /// accepted but that never made it to a terminal write locally, then
    /// rehydrates the OCO Manager's view of open pairs.
    pub async fn reconcile(&self) -> anyhow::Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let pending = self.state_store.list_pending_orders().await?;
        for mut order in pending {
            if order.exchange_order_id.is_some() {
                continue;
            }
            match self.gateway.find_by_client_order_id(order.order_id).await {
                Ok(Some((exchange_order_id, status))) => {
                    order.exchange_order_id = Some(exchange_order_id);
                    order.status = map_status(status);
                    order.updated_at = chrono::Utc::now();
                    self.state_store.put_order(&order).await?;
                    self.audit_recovered_order(order.order_id).await;
                    report.orders_recovered += 1;
                    info!(order_id = %order.order_id, "reconciled order found on exchange after restart");
                }
                Ok(None) => {
                    // The exchange never saw it either; nothing to reconcile,
                    // a fresh dispatch attempt will recreate it if the
                    // upstream bus redelivers the signal.
                    report.orders_unresolved += 1;
                }
                Err(err) => {
                    warn!(order_id = %order.order_id, error = %err, "reconciler lookup failed");
                    report.orders_unresolved += 1;
                }
            }
        }

        let open_pairs = self.state_store.list_open_oco_pairs().await?;
        for pair in open_pairs {
            if pair.state == OcoState::Armed || pair.state == OcoState::OneFilled {
                self.oco_manager.register(pair).await;
                report.oco_pairs_resubscribed += 1;
            }
        }

        Ok(report)
    }

    async fn audit_recovered_order(&self, order_id: OrderId) {
        let entry = crate::domain::ports::AuditEntry {
            event_id: self.audit_sink.next_event_id(),
            timestamp: chrono::Utc::now(),
            kind: crate::domain::ports::AuditKind::OrderStatusUpdate,
            signal_fingerprint: None,
            order_id: Some(order_id),
            exchange_order_id: None,
            oco_group_id: None,
            outcome: "reconciled".into(),
            reason: None,
            payload: serde_json::json!({}),
        };
        let _ = self.audit_sink.record(entry).await;
    }
}

fn map_status(status: crate::domain::ports::ExchangeOrderStatus) -> OrderStatus {
    match status {
        crate::domain::ports::ExchangeOrderStatus::Accepted => OrderStatus::Accepted,
        crate::domain::ports::ExchangeOrderStatus::Filled => OrderStatus::Filled,
        crate::domain::ports::ExchangeOrderStatus::PartiallyFilled => OrderStatus::PartiallyFilled,
        crate::domain::ports::ExchangeOrderStatus::Cancelled => OrderStatus::Cancelled,
        crate::domain::ports::ExchangeOrderStatus::Rejected => OrderStatus::Rejected,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileReport {
    pub orders_recovered: u32,
    pub orders_unresolved: u32,
    pub oco_pairs_resubscribed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::lock_manager::DistributedLockManager;
    use crate::domain::order::{Order, OrderSide, OrderType};
    use crate::domain::ports::GatewayOrderRequest;
    use crate::domain::signal::SignalFingerprint;
    use crate::infrastructure::audit::in_memory::InMemoryAuditSink;
    use crate::infrastructure::exchange::mock::MockExchangeGateway;
    use crate::infrastructure::state_store::in_memory::InMemoryStateStore;
    use crate::infrastructure::core::retry::RetryPolicy;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn recovers_order_the_exchange_confirms_but_store_never_persisted() {
        let store = Arc::new(InMemoryStateStore::new());
        let gateway = Arc::new(MockExchangeGateway::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let lock_manager = Arc::new(DistributedLockManager::new(store.clone()));
        let oco_manager = Arc::new(OcoManager::new(
            lock_manager,
            store.clone(),
            audit.clone(),
            gateway.clone(),
            Arc::new(crate::application::risk::PositionView::new()),
            Arc::new(crate::application::risk::StrategyActivityTracker::new()),
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_secs(30),
        ));

        let fp = SignalFingerprint("ema|BTCUSDT|buy|50000|1h|0".into());
        let order = Order::new("BTCUSDT", OrderSide::Buy, OrderType::Limit, dec!(0.002), Some(dec!(50000)), fp, "ema-cross");

        // Simulate: exchange accepted the order, but the engine crashed
        // before persisting it — the store never saw a `put_order` call.
        gateway
            .place(&GatewayOrderRequest {
                client_order_id: order.order_id,
                symbol: order.symbol.clone(),
                side: order.side,
                order_type: order.order_type,
                quantity: order.quantity,
                price: order.price,
            })
            .await
            .unwrap();
        // The order is "pending" from the store's perspective: it must
        // exist with no exchange_order_id for list_pending_orders to
        // surface it.
        store.put_order(&order).await.unwrap();

        let reconciler = Reconciler::new(store.clone(), gateway.clone(), audit, oco_manager);
        let report = reconciler.reconcile().await.unwrap();

        assert_eq!(report.orders_recovered, 1);
        let recovered = store.get_order(order.order_id).await.unwrap().unwrap();
        assert!(recovered.exchange_order_id.is_some());
    }
}
