//! Abstract contracts for the dispatcher's collaborators (`spec.md` §2).
//!
//! These are the seams the composition root injects concrete adapters
//! into; no module above this one reaches for a concrete store, sink,
//! or exchange client directly.

use crate::domain::errors::{AuditError, GatewayError, StateStoreError};
use crate::domain::lock::{Lock, ProcessedSignalRecord};
use crate::domain::oco::OcoPair;
use crate::domain::order::{Order, OrderId};
use crate::domain::signal::SignalFingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Durable mapping backing the lock registry, dedup set, order records,
/// and OCO pair records (`spec.md` §6 "State Store layout").
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_lock(&self, name: &str) -> Result<Option<Lock>, StateStoreError>;
    /// Insert-if-absent-or-expired, atomically. Returns `true` on success.
    async fn put_lock_if_absent_or_expired(
        &self,
        lock: &Lock,
        now: DateTime<Utc>,
    ) -> Result<bool, StateStoreError>;
    /// Overwrite the lock only if the current holder matches.
    async fn renew_lock(
        &self,
        name: &str,
        holder_id: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, StateStoreError>;
    async fn delete_lock_if_holder(
        &self,
        name: &str,
        holder_id: &str,
    ) -> Result<(), StateStoreError>;

    async fn get_processed_signal(
        &self,
        fingerprint: &SignalFingerprint,
    ) -> Result<Option<ProcessedSignalRecord>, StateStoreError>;
    async fn put_processed_signal(
        &self,
        record: &ProcessedSignalRecord,
    ) -> Result<(), StateStoreError>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, StateStoreError>;
    async fn put_order(&self, order: &Order) -> Result<(), StateStoreError>;
    async fn get_order_by_exchange_id(
        &self,
        exchange_order_id: &str,
    ) -> Result<Option<OrderId>, StateStoreError>;
    /// Orders that have been submitted but never confirmed persisted,
    /// consulted by the reconciler (`spec.md` §4.3 crash recovery note).
    async fn list_pending_orders(&self) -> Result<Vec<Order>, StateStoreError>;

    async fn get_oco_pair(&self, group_id: &str) -> Result<Option<OcoPair>, StateStoreError>;
    async fn put_oco_pair(&self, pair: &OcoPair) -> Result<(), StateStoreError>;
    async fn list_open_oco_pairs(&self) -> Result<Vec<OcoPair>, StateStoreError>;

    /// Records that an exchange event (`exchange_order_id`, `sequence`)
    /// has been processed. Returns `true` the first time a given pair is
    /// seen, `false` on redelivery — backs the OCO Manager's at-most-once
    /// handling and must survive a restart (`spec.md` §8).
    async fn mark_event_seen(
        &self,
        exchange_order_id: &str,
        sequence: u64,
    ) -> Result<bool, StateStoreError>;
}

/// Append-only log of every dispatch outcome and exchange call result
/// (`spec.md` §4.5 / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub signal_fingerprint: Option<SignalFingerprint>,
    pub order_id: Option<OrderId>,
    pub exchange_order_id: Option<String>,
    pub oco_group_id: Option<String>,
    pub outcome: String,
    pub reason: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SignalReceived,
    Dispatch,
    OrderSubmitted,
    OrderStatusUpdate,
    OcoTransition,
    Cancellation,
    Alert,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Must succeed before the dispatcher acknowledges the signal to the
    /// upstream bus; a write failure fails the dispatch (`spec.md` §4.5).
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
    /// Monotonic id for the next entry (`spec.md` §6 "Monotonic event_id").
    fn next_event_id(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    Accepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeOrderStatus {
    Accepted,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct GatewayOrderRequest {
    pub client_order_id: OrderId,
    pub symbol: String,
    pub side: crate::domain::order::OrderSide,
    pub order_type: crate::domain::order::OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct FillEvent {
    pub exchange_order_id: String,
    pub sequence: u64,
    pub new_status: ExchangeOrderStatus,
    pub fill_qty: Decimal,
    pub fill_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// The exchange client's abstract contract (`spec.md` §4.6). The core
/// never signs requests or manages reconnection — those are external
/// collaborators' concerns.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn place(
        &self,
        order: &GatewayOrderRequest,
    ) -> Result<(PlaceOutcome, String), GatewayError>;
    async fn cancel(&self, exchange_order_id: &str) -> Result<CancelOutcome, GatewayError>;
    async fn query(
        &self,
        exchange_order_id: &str,
    ) -> Result<ExchangeOrderStatus, GatewayError>;
    /// Look an order up by the client-order-id the engine assigned it,
    /// used by the reconciler after a crash between `place` and persist.
    async fn find_by_client_order_id(
        &self,
        client_order_id: OrderId,
    ) -> Result<Option<(String, ExchangeOrderStatus)>, GatewayError>;
    /// Subscribe to the at-least-once fill/cancel event stream.
    async fn subscribe_events(&self) -> tokio::sync::mpsc::Receiver<FillEvent>;
}
