//! Deterministic in-memory `ExchangeGateway`, grounded on the shape of
//! the reference engine's `BinanceExecutionService` (circuit-breaker
//! wrapped calls, `broadcast` channel for fill events) but without any
//! real signing/network — the concrete exchange client is out of scope
//! (`spec.md` §1).
//!
//! Tests drive behavior by queueing scripted responses and pushing fill
//! events through `push_event`.

use crate::domain::errors::GatewayError;
use crate::domain::order::OrderId;
use crate::domain::ports::{
    CancelOutcome, ExchangeGateway, ExchangeOrderStatus, FillEvent, GatewayOrderRequest,
    PlaceOutcome,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone)]
pub enum ScriptedPlaceResponse {
    Accept,
    Reject(String),
    Transient(String),
}

struct OrderRecord {
    exchange_order_id: String,
    status: ExchangeOrderStatus,
}

pub struct MockExchangeGateway {
    place_script: Mutex<VecDeque<ScriptedPlaceResponse>>,
    cancel_should_fail_transient: Mutex<HashMap<String, u32>>,
    orders: Mutex<HashMap<String, OrderRecord>>,
    by_client_order_id: Mutex<HashMap<OrderId, String>>,
    events_tx: broadcast::Sender<FillEvent>,
    next_exchange_id: AtomicU64,
    sequence: AtomicU64,
    pub place_calls: AtomicU64,
    pub cancel_calls: AtomicU64,
}

impl MockExchangeGateway {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            place_script: Mutex::new(VecDeque::new()),
            cancel_should_fail_transient: Mutex::new(HashMap::new()),
            orders: Mutex::new(HashMap::new()),
            by_client_order_id: Mutex::new(HashMap::new()),
            events_tx,
            next_exchange_id: AtomicU64::new(1),
            sequence: AtomicU64::new(1),
            place_calls: AtomicU64::new(0),
            cancel_calls: AtomicU64::new(0),
        }
    }

    /// Queue a scripted response for the next `place` call. Unscripted
    /// calls default to `Accept`.
    pub fn script_place(&self, response: ScriptedPlaceResponse) {
        self.place_script.lock().unwrap().push_back(response);
    }

    /// Make the next N `cancel` calls for `exchange_order_id` return
    /// `Transient` before succeeding, for retry-path tests.
    pub fn fail_cancel_transiently(&self, exchange_order_id: &str, times: u32) {
        self.cancel_should_fail_transient
            .lock()
            .unwrap()
            .insert(exchange_order_id.to_string(), times);
    }

    /// Push a fill/cancel event to every subscriber, simulating the
    /// exchange's at-least-once event stream.
    pub fn push_event(&self, event: FillEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MockExchangeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeGateway for MockExchangeGateway {
    async fn place(
        &self,
        order: &GatewayOrderRequest,
    ) -> Result<(PlaceOutcome, String), GatewayError> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.place_script.lock().unwrap().pop_front();
        match scripted {
            Some(ScriptedPlaceResponse::Reject(reason)) => {
                return Err(GatewayError::Rejected { reason });
            }
            Some(ScriptedPlaceResponse::Transient(reason)) => {
                return Err(GatewayError::Transient { reason });
            }
            Some(ScriptedPlaceResponse::Accept) | None => {}
        }

        let exchange_order_id = format!(
            "EX-{}",
            self.next_exchange_id.fetch_add(1, Ordering::SeqCst)
        );

        self.orders.lock().unwrap().insert(
            exchange_order_id.clone(),
            OrderRecord {
                exchange_order_id: exchange_order_id.clone(),
                status: ExchangeOrderStatus::Accepted,
            },
        );
        self.by_client_order_id
            .lock()
            .unwrap()
            .insert(order.client_order_id, exchange_order_id.clone());

        Ok((PlaceOutcome::Accepted, exchange_order_id))
    }

    async fn cancel(&self, exchange_order_id: &str) -> Result<CancelOutcome, GatewayError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut failures = self.cancel_should_fail_transient.lock().unwrap();
            if let Some(remaining) = failures.get_mut(exchange_order_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(GatewayError::Transient {
                        reason: "simulated transient cancel failure".into(),
                    });
                }
            }
        }

        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(exchange_order_id) {
            None => Ok(CancelOutcome::NotFound),
            Some(record) if record.status.is_terminal_like() => Ok(CancelOutcome::NotFound),
            Some(record) => {
                record.status = ExchangeOrderStatus::Cancelled;
                Ok(CancelOutcome::Cancelled)
            }
        }
    }

    async fn query(&self, exchange_order_id: &str) -> Result<ExchangeOrderStatus, GatewayError> {
        self.orders
            .lock()
            .unwrap()
            .get(exchange_order_id)
            .map(|r| r.status)
            .ok_or_else(|| GatewayError::NotFound {
                exchange_order_id: exchange_order_id.to_string(),
            })
    }

    async fn find_by_client_order_id(
        &self,
        client_order_id: OrderId,
    ) -> Result<Option<(String, ExchangeOrderStatus)>, GatewayError> {
        let by_client = self.by_client_order_id.lock().unwrap();
        let Some(exchange_order_id) = by_client.get(&client_order_id) else {
            return Ok(None);
        };
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .get(exchange_order_id)
            .map(|r| (r.exchange_order_id.clone(), r.status)))
    }

    async fn subscribe_events(&self) -> mpsc::Receiver<FillEvent> {
        let mut broadcast_rx = self.events_tx.subscribe();
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            while let Ok(event) = broadcast_rx.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

trait TerminalLike {
    fn is_terminal_like(&self) -> bool;
}

impl TerminalLike for ExchangeOrderStatus {
    fn is_terminal_like(&self) -> bool {
        matches!(
            self,
            ExchangeOrderStatus::Cancelled | ExchangeOrderStatus::Rejected
        )
    }
}
