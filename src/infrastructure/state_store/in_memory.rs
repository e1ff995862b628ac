//! In-memory `StateStore`. Thread-safe via `Arc<RwLock<_>>`, suitable
//! for tests and single-instance development, per the pattern the
//! reference engine's `InMemoryTradeRepository`/`InMemoryPortfolioRepository`
//! use for the same purpose.

use crate::domain::errors::StateStoreError;
use crate::domain::lock::{Lock, ProcessedSignalRecord};
use crate::domain::oco::{OcoPair, OcoState};
use crate::domain::order::{Order, OrderId};
use crate::domain::ports::StateStore;
use crate::domain::signal::SignalFingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct Tables {
    locks: HashMap<String, Lock>,
    signals: HashMap<SignalFingerprint, ProcessedSignalRecord>,
    orders: HashMap<OrderId, Order>,
    order_by_exchange_id: HashMap<String, OrderId>,
    oco_pairs: HashMap<String, OcoPair>,
    seen_events: std::collections::HashSet<(String, u64)>,
}

pub struct InMemoryStateStore {
    tables: RwLock<Tables>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_lock(&self, name: &str) -> Result<Option<Lock>, StateStoreError> {
        Ok(self.tables.read().unwrap().locks.get(name).cloned())
    }

    async fn put_lock_if_absent_or_expired(
        &self,
        lock: &Lock,
        now: DateTime<Utc>,
    ) -> Result<bool, StateStoreError> {
        let mut tables = self.tables.write().unwrap();
        let can_take = match tables.locks.get(&lock.name) {
            None => true,
            Some(existing) => existing.is_expired_at(now),
        };
        if can_take {
            tables.locks.insert(lock.name.clone(), lock.clone());
        }
        Ok(can_take)
    }

    async fn renew_lock(
        &self,
        name: &str,
        holder_id: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, StateStoreError> {
        let mut tables = self.tables.write().unwrap();
        match tables.locks.get_mut(name) {
            Some(lock) if lock.holder_id == holder_id => {
                lock.expires_at = new_expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_lock_if_holder(
        &self,
        name: &str,
        holder_id: &str,
    ) -> Result<(), StateStoreError> {
        let mut tables = self.tables.write().unwrap();
        if let Some(lock) = tables.locks.get(name) {
            if lock.holder_id == holder_id {
                tables.locks.remove(name);
            }
        }
        Ok(())
    }

    async fn get_processed_signal(
        &self,
        fingerprint: &SignalFingerprint,
    ) -> Result<Option<ProcessedSignalRecord>, StateStoreError> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .signals
            .get(fingerprint)
            .cloned())
    }

    async fn put_processed_signal(
        &self,
        record: &ProcessedSignalRecord,
    ) -> Result<(), StateStoreError> {
        self.tables
            .write()
            .unwrap()
            .signals
            .insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, StateStoreError> {
        Ok(self.tables.read().unwrap().orders.get(&order_id).cloned())
    }

    async fn put_order(&self, order: &Order) -> Result<(), StateStoreError> {
        let mut tables = self.tables.write().unwrap();
        if let Some(exchange_id) = &order.exchange_order_id {
            tables
                .order_by_exchange_id
                .insert(exchange_id.clone(), order.order_id);
        }
        tables.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn get_order_by_exchange_id(
        &self,
        exchange_order_id: &str,
    ) -> Result<Option<OrderId>, StateStoreError> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .order_by_exchange_id
            .get(exchange_order_id)
            .copied())
    }

    async fn list_pending_orders(&self) -> Result<Vec<Order>, StateStoreError> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .orders
            .values()
            .filter(|o| o.exchange_order_id.is_none() && !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_oco_pair(&self, group_id: &str) -> Result<Option<OcoPair>, StateStoreError> {
        Ok(self.tables.read().unwrap().oco_pairs.get(group_id).cloned())
    }

    async fn put_oco_pair(&self, pair: &OcoPair) -> Result<(), StateStoreError> {
        self.tables
            .write()
            .unwrap()
            .oco_pairs
            .insert(pair.group_id.0.clone(), pair.clone());
        Ok(())
    }

    async fn list_open_oco_pairs(&self) -> Result<Vec<OcoPair>, StateStoreError> {
        Ok(self
            .tables
            .read()
            .unwrap()
            .oco_pairs
            .values()
            .filter(|p| !matches!(p.state, OcoState::Completed | OcoState::Failed))
            .cloned()
            .collect())
    }

    async fn mark_event_seen(
        &self,
        exchange_order_id: &str,
        sequence: u64,
    ) -> Result<bool, StateStoreError> {
        Ok(self
            .tables
            .write()
            .unwrap()
            .seen_events
            .insert((exchange_order_id.to_string(), sequence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_roundtrip() {
        let store = InMemoryStateStore::new();
        let now = Utc::now();
        let lock = Lock {
            name: "signal:abc".into(),
            holder_id: "w1".into(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(30),
        };

        assert!(store.put_lock_if_absent_or_expired(&lock, now).await.unwrap());
        assert!(!store.put_lock_if_absent_or_expired(&lock, now).await.unwrap());

        let expired_check = now + chrono::Duration::seconds(31);
        assert!(
            store
                .put_lock_if_absent_or_expired(&lock, expired_check)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn order_by_exchange_id_index_populated_on_put() {
        use crate::domain::order::{Order, OrderSide, OrderType};
        use crate::domain::signal::SignalFingerprint;
        use rust_decimal_macros::dec;

        let store = InMemoryStateStore::new();
        let mut order = Order::new(
            "BTCUSDT",
            OrderSide::Buy,
            OrderType::Limit,
            dec!(0.002),
            Some(dec!(50000)),
            SignalFingerprint("fp".into()),
            "ema-cross",
        );
        order.exchange_order_id = Some("EX-1".into());

        store.put_order(&order).await.unwrap();

        let found = store.get_order_by_exchange_id("EX-1").await.unwrap();
        assert_eq!(found, Some(order.order_id));
    }
}
