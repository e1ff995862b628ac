//! End-to-end scenarios over the Dispatcher/OCO Manager/Reconciler
//! wired against in-memory adapters, exercising the same collaborator
//! seams the composition root wires against real ones.

use dispatch_core::application::dispatcher::Dispatcher;
use dispatch_core::application::lock_manager::DistributedLockManager;
use dispatch_core::application::oco_manager::OcoManager;
use dispatch_core::application::reconciler::Reconciler;
use dispatch_core::application::risk::{PositionView, RiskConfig, StrategyActivityTracker};
use dispatch_core::domain::order::{OrderStatus, OrderType};
use dispatch_core::domain::ports::{AuditSink, ExchangeGateway, GatewayOrderRequest, StateStore};
use dispatch_core::domain::signal::{Signal, SignalAction};
use dispatch_core::infrastructure::audit::in_memory::InMemoryAuditSink;
use dispatch_core::infrastructure::core::retry::RetryPolicy;
use dispatch_core::infrastructure::exchange::mock::{MockExchangeGateway, ScriptedPlaceResponse};
use dispatch_core::infrastructure::state_store::in_memory::InMemoryStateStore;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn permissive_risk_config() -> RiskConfig {
    RiskConfig {
        symbol_allowlist: HashSet::new(),
        max_position_notional_per_symbol: dec!(1_000_000),
        max_aggregate_notional: dec!(1_000_000),
        min_order_notional: dec!(5),
        max_order_notional: dec!(1_000_000),
        max_orders_per_minute: 30,
        max_open_orders_per_strategy: 50,
        min_confidence: 0.0,
    }
}

fn base_signal() -> Signal {
    Signal {
        strategy_id: "ema-cross".into(),
        symbol: "BTCUSDT".into(),
        action: SignalAction::Buy,
        price: Some(dec!(50000)),
        quantity: Some(dec!(0.01)),
        confidence: 0.8,
        timeframe: "1h".into(),
        timestamp: chrono::Utc::now(),
        stop_loss: None,
        take_profit: None,
        meta: HashMap::new(),
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    oco_manager: Arc<OcoManager>,
    state_store: Arc<InMemoryStateStore>,
    gateway: Arc<MockExchangeGateway>,
    audit: Arc<InMemoryAuditSink>,
}

fn build_harness(risk_config: RiskConfig) -> Harness {
    let state_store = Arc::new(InMemoryStateStore::new());
    let audit: Arc<InMemoryAuditSink> = Arc::new(InMemoryAuditSink::new());
    let gateway = Arc::new(MockExchangeGateway::new());
    let lock_manager = Arc::new(DistributedLockManager::new(state_store.clone()));
    let position_view = Arc::new(PositionView::new());
    let strategy_activity = Arc::new(StrategyActivityTracker::new());

    let oco_manager = Arc::new(OcoManager::new(
        lock_manager.clone(),
        state_store.clone() as Arc<dyn StateStore>,
        audit.clone() as Arc<dyn AuditSink>,
        gateway.clone() as Arc<dyn ExchangeGateway>,
        position_view.clone(),
        strategy_activity.clone(),
        RetryPolicy::new(3, Duration::from_millis(1)),
        Duration::from_secs(30),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        lock_manager,
        state_store.clone() as Arc<dyn StateStore>,
        audit.clone() as Arc<dyn AuditSink>,
        gateway.clone() as Arc<dyn ExchangeGateway>,
        oco_manager.clone(),
        position_view,
        strategy_activity,
        risk_config,
        dispatch_core::config::ExecConfig {
            default_target_notional: dec!(10),
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
            request_deadline: Duration::from_secs(5),
            dispatch_workers: 1,
            shutdown_grace_period: Duration::from_secs(1),
        },
        Duration::from_secs(30),
        24,
    ));

    Harness {
        dispatcher,
        oco_manager,
        state_store,
        gateway,
        audit,
    }
}

#[tokio::test]
async fn happy_path_buy_executes_and_persists_order() {
    let harness = build_harness(permissive_risk_config());
    let result = harness.dispatcher.dispatch(base_signal()).await;

    match result {
        dispatch_core::application::dispatcher::DispatchResult::Executed { order_id } => {
            let order = harness.state_store.get_order(order_id).await.unwrap().unwrap();
            assert_eq!(order.status, OrderStatus::Accepted);
            assert_eq!(order.symbol, "BTCUSDT");
        }
        other => panic!("expected Executed, got {other:?}"),
    }
    assert_eq!(harness.gateway.place_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(!harness.audit.entries().is_empty());
}

#[tokio::test]
async fn duplicate_signal_is_rejected_on_second_dispatch() {
    let harness = build_harness(permissive_risk_config());
    let signal = base_signal();

    let first = harness.dispatcher.dispatch(signal.clone()).await;
    assert!(matches!(
        first,
        dispatch_core::application::dispatcher::DispatchResult::Executed { .. }
    ));

    let second = harness.dispatcher.dispatch(signal).await;
    assert_eq!(second, dispatch_core::application::dispatcher::DispatchResult::Duplicate);
    // Only the first dispatch should have reached the exchange.
    assert_eq!(harness.gateway.place_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn below_minimum_notional_is_risk_rejected() {
    let mut risk_config = permissive_risk_config();
    risk_config.min_order_notional = dec!(10_000);

    let harness = build_harness(risk_config);
    let mut signal = base_signal();
    signal.price = Some(dec!(50000));
    signal.quantity = Some(dec!(0.001)); // notional = 50 << 10_000 minimum

    let result = harness.dispatcher.dispatch(signal).await;
    match result {
        dispatch_core::application::dispatcher::DispatchResult::RiskRejected { reason } => {
            assert!(reason.contains("minimum"));
        }
        other => panic!("expected RiskRejected, got {other:?}"),
    }
    assert_eq!(harness.gateway.place_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn oco_stop_fill_cancels_take_profit_sibling() {
    let harness = build_harness(permissive_risk_config());
    let mut signal = base_signal();
    signal.stop_loss = Some(dec!(49000));
    signal.take_profit = Some(dec!(51000));

    let result = harness.dispatcher.dispatch(signal).await;
    let order_id = match result {
        dispatch_core::application::dispatcher::DispatchResult::Executed { order_id } => order_id,
        other => panic!("expected Executed, got {other:?}"),
    };

    let entry_order = harness.state_store.get_order(order_id).await.unwrap().unwrap();
    let group_id = entry_order
        .oco_group_id
        .clone()
        .expect("entry order with both protective prices should arm an OCO pair");

    let pair = harness
        .state_store
        .get_oco_pair(&group_id)
        .await
        .unwrap()
        .expect("armed OCO pair should be persisted");

    let stop_order = harness.state_store.get_order(pair.stop_order_id).await.unwrap().unwrap();
    let stop_exchange_id = stop_order.exchange_order_id.clone().unwrap();

    harness.oco_manager.handle_event(dispatch_core::domain::ports::FillEvent {
        exchange_order_id: stop_exchange_id,
        sequence: harness.gateway.next_sequence(),
        new_status: dispatch_core::domain::ports::ExchangeOrderStatus::Filled,
        fill_qty: dec!(0.01),
        fill_price: Some(dec!(49000)),
        timestamp: chrono::Utc::now(),
    }).await;

    let updated_pair = harness.state_store.get_oco_pair(&group_id).await.unwrap().unwrap();
    assert_eq!(updated_pair.state, dispatch_core::domain::oco::OcoState::Completed);
    assert_eq!(harness.gateway.cancel_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_exchange_failure_recovers_on_retry() {
    let harness = build_harness(permissive_risk_config());
    harness.gateway.script_place(ScriptedPlaceResponse::Transient("timeout".into()));

    let result = harness.dispatcher.dispatch(base_signal()).await;
    assert!(matches!(
        result,
        dispatch_core::application::dispatcher::DispatchResult::Executed { .. }
    ));
    assert_eq!(harness.gateway.place_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn permanent_rejection_is_not_retried() {
    let harness = build_harness(permissive_risk_config());
    harness.gateway.script_place(ScriptedPlaceResponse::Reject("insufficient margin".into()));

    let result = harness.dispatcher.dispatch(base_signal()).await;
    match result {
        dispatch_core::application::dispatcher::DispatchResult::ExchangeFailed { reason } => {
            assert!(reason.contains("insufficient margin"));
        }
        other => panic!("expected ExchangeFailed, got {other:?}"),
    }
    assert_eq!(harness.gateway.place_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

/// Simulates a crash between the exchange accepting an order and the
/// dispatcher persisting it — the exchange knows about the order by its
/// client-order-id, but the store has no record at all. The Reconciler
/// must recover it at startup.
#[tokio::test]
async fn reconciler_recovers_order_the_store_never_persisted() {
    let state_store = Arc::new(InMemoryStateStore::new());
    let audit: Arc<InMemoryAuditSink> = Arc::new(InMemoryAuditSink::new());
    let gateway = Arc::new(MockExchangeGateway::new());
    let lock_manager = Arc::new(DistributedLockManager::new(state_store.clone()));
    let oco_manager = Arc::new(OcoManager::new(
        lock_manager,
        state_store.clone() as Arc<dyn StateStore>,
        audit.clone() as Arc<dyn AuditSink>,
        gateway.clone() as Arc<dyn ExchangeGateway>,
        Arc::new(PositionView::new()),
        Arc::new(StrategyActivityTracker::new()),
        RetryPolicy::new(3, Duration::from_millis(1)),
        Duration::from_secs(30),
    ));

    let fp = dispatch_core::domain::signal::SignalFingerprint("ema|BTCUSDT|buy|50000|1h|0".into());
    let mut order = dispatch_core::domain::order::Order::new(
        "BTCUSDT",
        dispatch_core::domain::order::OrderSide::Buy,
        OrderType::Limit,
        dec!(0.01),
        Some(dec!(50000)),
        fp,
        "ema-cross",
    );

    // Exchange accepted the order...
    let (_, exchange_order_id) = gateway
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

    // ...but the "crash" means only the pending (pre-exchange) record
    // made it to the store, never updated with the exchange order id.
    state_store.put_order(&order).await.unwrap();
    assert!(order.exchange_order_id.is_none());

    let reconciler = Reconciler::new(
        state_store.clone() as Arc<dyn StateStore>,
        gateway.clone() as Arc<dyn ExchangeGateway>,
        audit.clone() as Arc<dyn AuditSink>,
        oco_manager,
    );
    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.orders_recovered, 1);

    let recovered = state_store.get_order(order.order_id).await.unwrap().unwrap();
    assert_eq!(recovered.exchange_order_id, Some(exchange_order_id));
    assert_eq!(recovered.status, OrderStatus::Accepted);
    order.exchange_order_id = recovered.exchange_order_id.clone();
}

/// Spec §8's primary quantified invariant: N concurrent dispatches of
/// the same signal, racing through the advisory check and the
/// authoritative per-fingerprint lock, yield exactly one `Executed`.
#[tokio::test]
async fn concurrent_dispatch_of_the_same_signal_executes_exactly_once() {
    let harness = build_harness(permissive_risk_config());
    let signal = base_signal();

    const CONCURRENT_DISPATCHES: usize = 16;
    let tasks: Vec<_> = (0..CONCURRENT_DISPATCHES)
        .map(|_| {
            let dispatcher = harness.dispatcher.clone();
            let signal = signal.clone();
            tokio::spawn(async move { dispatcher.dispatch(signal).await })
        })
        .collect();

    let results = futures::future::join_all(tasks).await;

    let executed_count = results
        .iter()
        .filter(|r| {
            matches!(
                r.as_ref().unwrap(),
                dispatch_core::application::dispatcher::DispatchResult::Executed { .. }
            )
        })
        .count();
    let duplicate_count = results
        .iter()
        .filter(|r| {
            matches!(
                r.as_ref().unwrap(),
                dispatch_core::application::dispatcher::DispatchResult::Duplicate
                    | dispatch_core::application::dispatcher::DispatchResult::LockDenied
            )
        })
        .count();

    assert_eq!(executed_count, 1, "expected exactly one Executed among {results:?}");
    assert_eq!(duplicate_count, CONCURRENT_DISPATCHES - 1);
    assert_eq!(harness.gateway.place_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}
